//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use component_resolver::{
    CallScope, ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance,
    ScopeStrategy,
};
use std::sync::Arc;

// Example components
#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

#[allow(dead_code)]
struct RequestContext {
    request_id: String,
}

fn main() {
    // Uses JSON if logging-json is enabled, pretty if logging-pretty is enabled
    component_resolver::logging::builder().trace().resolver_only().from_env().init();

    println!("=== Component Resolver Logging Demo ===\n");

    let store = DescriptorRegistry::new()
        .with(
            "database",
            ComponentDescriptor::new().property("url", "postgres://localhost/mydb"),
        )
        .with("users", ComponentDescriptor::new().depends_on(["database"]))
        .with("request", ComponentDescriptor::new().scoped("call"));

    let creator = FnCreator::new()
        .with("database", |req| {
            Ok(Instance::new(Database {
                url: req.property("url").unwrap_or_default().to_owned(),
            }))
        })
        .with("users", |req| {
            Ok(Instance::new(UserService {
                db: req.get::<Database>("database")?,
            }))
        })
        .with("request", |_| {
            println!("  [App] Request context being created...");
            Ok(Instance::new(RequestContext {
                request_id: "req-12345".into(),
            }))
        })
        .with_destroy("request", |_| println!("  [App] Request context destroyed"));

    let calls = Arc::new(CallScope::new());

    // logs: "Creating component container"
    let container = Container::builder(store, creator)
        .scope("call", Arc::clone(&calls) as Arc<dyn ScopeStrategy>)
        .build()
        .unwrap();

    // logs: "Registered alias"
    container.register_alias("users", "userService").unwrap();

    // logs: "Canonicalized alias", "Creating shared instance of singleton", "Creating component instance"
    let _users = container.get::<UserService>("userService").unwrap();

    // logs: "Returning cached singleton"
    let _db = container.get::<Database>("database").unwrap();

    // Resolving a missing component fails with NotFound
    assert!(container.try_get::<i32>("missing").is_none());

    // A child container delegates unknown names to its parent
    // logs: "No local descriptor, delegating to parent container"
    let child = container
        .child(DescriptorRegistry::new(), FnCreator::new())
        .build()
        .unwrap();
    let _db_from_child = child.get::<Database>("database").unwrap();

    // Call-scoped components live as long as the call
    {
        let _call = calls.enter();
        let _ctx = container.get::<RequestContext>("request").unwrap();
        let _same = container.get::<RequestContext>("request").unwrap();
    }

    // logs: "Destroying singletons of container"
    container.destroy_singletons();

    println!("\n=== Demo Complete ===");
    println!("Check the log output above to see structured logging in action!");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
