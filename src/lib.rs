//! # component-resolver - Hierarchical Component Resolution
//!
//! A runtime that turns component names into live instances. Components are
//! described by [`ComponentDescriptor`]s, built by a pluggable
//! [`ComponentCreator`], and cached according to their scope.
//!
//! ## Features
//!
//! - **Scopes** - singleton, prototype and custom scopes ([`ThreadScope`], [`CallScope`])
//! - **Descriptor inheritance** - child descriptors merge over their parent chain
//! - **Aliases** - chained aliases with cycle detection
//! - **Indirect factories** - `name` yields the product, `&name` the factory
//! - **Hierarchy** - names without a local descriptor resolve in the parent container
//! - **Circular references** - early singleton references, prototype and
//!   depends-on cycle detection
//! - **Concurrent** - each singleton is created exactly once across threads
//! - **Observable** - optional `tracing` events with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use component_resolver::{ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance};
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: std::sync::Arc<Database>,
//! }
//!
//! let store = DescriptorRegistry::new()
//!     .with("database", ComponentDescriptor::new().property("url", "postgres://localhost"))
//!     .with("users", ComponentDescriptor::new().depends_on(["database"]));
//!
//! let creator = FnCreator::new()
//!     .with("database", |req| {
//!         let url = req.property("url").unwrap_or_default().to_owned();
//!         Ok(Instance::new(Database { url }))
//!     })
//!     .with("users", |req| {
//!         Ok(Instance::new(UserService { db: req.get::<Database>("database")? }))
//!     });
//!
//! let container = Container::builder(store, creator).build().unwrap();
//! container.register_alias("users", "userService").unwrap();
//!
//! let users = container.get::<UserService>("userService").unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use component_resolver::{
//!     CallScope, ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance,
//!     ScopeStrategy,
//! };
//! use std::sync::Arc;
//!
//! struct RequestContext;
//!
//! let calls = Arc::new(CallScope::new());
//! let container = Container::builder(
//!     DescriptorRegistry::new().with("ctx", ComponentDescriptor::new().scoped("call")),
//!     FnCreator::new().with("ctx", |_| Ok(Instance::new(RequestContext))),
//! )
//! .scope("call", Arc::clone(&calls) as Arc<dyn ScopeStrategy>)
//! .build()
//! .unwrap();
//!
//! // Outside a call the scope is inactive
//! assert!(container.resolve("ctx").is_err());
//!
//! let _call = calls.enter();
//! let a = container.resolve("ctx").unwrap();
//! let b = container.resolve("ctx").unwrap();
//! assert!(a.ptr_eq(&b));
//! ```
//!
//! ## Hierarchy
//!
//! ```rust
//! use component_resolver::{ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance};
//!
//! let root = Container::builder(
//!     DescriptorRegistry::new().with("config", ComponentDescriptor::new()),
//!     FnCreator::new().with("config", |_| Ok(Instance::new(String::from("app")))),
//! )
//! .build()
//! .unwrap();
//!
//! let child = root
//!     .child(DescriptorRegistry::new(), FnCreator::new())
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(*child.get::<String>("config").unwrap(), "app");
//! assert!(child.contains("config"));
//! assert!(!child.contains_local("config"));
//! ```

mod alias;
mod container;
mod convert;
mod creation;
mod descriptor;
mod error;
mod factory;
mod graph;
mod instance;
#[cfg(feature = "logging")]
pub mod logging;
mod merge;
mod provider;
mod scope;
mod singleton;
mod storage;

pub use alias::AliasRegistry;
pub use container::{Container, ContainerBuilder, ContainerConfig};
pub use convert::{ConversionService, TypeConverter};
pub use descriptor::{
    ComponentDescriptor, ComponentType, DecoratedDescriptor, MergedDescriptor, ScopeKind,
};
pub use error::{BoxError, ResolveError, Result, ScopeError, SharedError};
pub use factory::{FACTORY_PREFIX, FactoryComponent, is_factory_dereference};
pub use instance::Instance;
pub use provider::{Argument, ComponentCreator, CreationRequest, FnCreator};
pub use scope::{CallScope, CallScopeGuard, ScopeId, ScopeStrategy, ThreadScope};
pub use singleton::DestructionCallback;
pub use storage::{DescriptorRegistry, DescriptorStore};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ComponentCreator, ComponentDescriptor, ComponentType, Container, CreationRequest,
        DescriptorRegistry, DescriptorStore, FactoryComponent, FnCreator, Instance, ResolveError,
        Result, ScopeKind, ScopeStrategy,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, OnceLock};
    use std::thread;

    struct Database {
        url: String,
    }

    #[test]
    fn test_singleton_shared_across_threads() {
        let created = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&created);
        let container = Container::builder(
            DescriptorRegistry::new().with("db", ComponentDescriptor::new()),
            FnCreator::new().with("db", move |_| {
                hook.fetch_add(1, Ordering::SeqCst);
                thread::sleep(std::time::Duration::from_millis(5));
                Ok(Instance::new(Database { url: "pg".into() }))
            }),
        )
        .build()
        .unwrap();

        let barrier = Barrier::new(8);
        let instances: Vec<Arc<Database>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        container.get::<Database>("db").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|db| Arc::ptr_eq(db, &instances[0])));
        assert_eq!(instances[0].url, "pg");
    }

    struct Left {
        right: OnceLock<Arc<Right>>,
    }

    struct Right {
        left: Arc<Left>,
    }

    #[test]
    fn test_circular_singletons_through_early_reference() {
        let container = Container::builder(
            DescriptorRegistry::new()
                .with("left", ComponentDescriptor::new())
                .with("right", ComponentDescriptor::new()),
            FnCreator::new()
                .with("left", |req| {
                    let left = Arc::new(Left {
                        right: OnceLock::new(),
                    });
                    assert!(req.expose_early(Instance::from_arc(Arc::clone(&left))));
                    let right = req.get::<Right>("right")?;
                    let _ = left.right.set(right);
                    Ok(Instance::from_arc(left))
                })
                .with("right", |req| {
                    Ok(Instance::new(Right {
                        left: req.get::<Left>("left")?,
                    }))
                }),
        )
        .build()
        .unwrap();

        let left = container.get::<Left>("left").unwrap();
        let right = container.get::<Right>("right").unwrap();

        assert!(Arc::ptr_eq(&right.left, &left));
        assert!(Arc::ptr_eq(left.right.get().unwrap(), &right));
        assert!(!container.is_currently_in_creation("left"));
    }

    #[test]
    fn test_failed_singleton_evicts_holders_of_its_early_reference() {
        let container = Container::builder(
            DescriptorRegistry::new()
                .with("left", ComponentDescriptor::new())
                .with("right", ComponentDescriptor::new()),
            FnCreator::new()
                .with("left", |req| {
                    let left = Arc::new(Left {
                        right: OnceLock::new(),
                    });
                    assert!(req.expose_early(Instance::from_arc(left)));
                    req.get::<Right>("right")?;
                    Err(ResolveError::creation_failed(req.name, "failed after wiring"))
                })
                .with("right", |req| {
                    Ok(Instance::new(Right {
                        left: req.get::<Left>("left")?,
                    }))
                }),
        )
        .build()
        .unwrap();

        let err = container.resolve("left").unwrap_err();
        assert!(matches!(err, ResolveError::CreationFailed { .. }));

        // `right` captured the unfinished `left` and must not outlive the failure
        assert!(!container.contains_singleton("left"));
        assert!(!container.contains_singleton("right"));
        assert!(container.dependents_of("left").is_empty());
    }

    #[test]
    fn test_singleton_self_reference_without_early_reference() {
        let container = Container::builder(
            DescriptorRegistry::new().with("loop", ComponentDescriptor::new()),
            FnCreator::new().with("loop", |req| {
                req.resolve("loop")?;
                Ok(Instance::new(0u8))
            }),
        )
        .build()
        .unwrap();

        let err = container.resolve("loop").unwrap_err();
        assert!(matches!(err, ResolveError::CurrentlyInCreation { .. }));
        assert!(!container.contains_singleton("loop"));
        assert!(!container.is_currently_in_creation("loop"));
    }

    #[test]
    fn test_circular_prototype() {
        let container = Container::builder(
            DescriptorRegistry::new().with("proto", ComponentDescriptor::new().prototype()),
            FnCreator::new().with("proto", |req| {
                req.resolve("proto")?;
                Ok(Instance::new(0u8))
            }),
        )
        .build()
        .unwrap();

        let err = container.resolve("proto").unwrap_err();
        assert!(matches!(err, ResolveError::CircularPrototype { .. }));

        // The in-creation marker is cleared after the failure
        assert!(!container.is_currently_in_creation("proto"));
    }

    #[test]
    fn test_circular_prototype_pair() {
        let container = Container::builder(
            DescriptorRegistry::new()
                .with("a", ComponentDescriptor::new().prototype())
                .with("b", ComponentDescriptor::new().prototype()),
            FnCreator::new()
                .with("a", |req| {
                    req.resolve("b")?;
                    Ok(Instance::new(0u8))
                })
                .with("b", |req| {
                    req.resolve("a")?;
                    Ok(Instance::new(1u8))
                }),
        )
        .build()
        .unwrap();

        match container.resolve("a").unwrap_err() {
            ResolveError::CircularPrototype { name } => assert_eq!(name, "a"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!container.is_currently_in_creation("a"));
        assert!(!container.is_currently_in_creation("b"));
    }

    #[test]
    fn test_canonical_name_is_idempotent() {
        let container = Container::builder(
            DescriptorRegistry::new().with("db", ComponentDescriptor::new()),
            FnCreator::new(),
        )
        .build()
        .unwrap();
        container.register_alias("db", "database").unwrap();
        container.register_alias("database", "primary").unwrap();

        for name in ["db", "database", "primary", "&primary", "&&database", "unknown", "&unknown"] {
            let once = container.canonical_name(name);
            assert_eq!(container.canonical_name(&once), once, "not idempotent for {name}");
        }
        assert_eq!(container.canonical_name("&&primary"), "db");
        assert_eq!(container.canonical_name("&unknown"), "unknown");
    }

    #[test]
    fn test_descriptor_inheritance() {
        let created = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&created);
        let container = Container::builder(
            DescriptorRegistry::new()
                .with(
                    "base",
                    ComponentDescriptor::new()
                        .prototype()
                        .as_abstract()
                        .property("pool", "10")
                        .property("timeout", "30"),
                )
                .with("child", ComponentDescriptor::new().with_parent("base").property("timeout", "5")),
            FnCreator::new().with("child", move |req| {
                hook.fetch_add(1, Ordering::SeqCst);
                let pool = req.property("pool").unwrap_or_default().to_owned();
                let timeout = req.property("timeout").unwrap_or_default().to_owned();
                Ok(Instance::new((pool, timeout)))
            }),
        )
        .build()
        .unwrap();

        let merged = container.merged_descriptor("child").unwrap();
        assert!(merged.is_prototype());
        assert!(!merged.is_abstract());

        let a = container.resolve("child").unwrap();
        let b = container.resolve("child").unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(
            a.downcast_ref::<(String, String)>(),
            Some(&("10".to_string(), "5".to_string()))
        );
        assert_eq!(created.load(Ordering::SeqCst), 2);

        assert!(matches!(
            container.resolve("base").unwrap_err(),
            ResolveError::Abstract { .. }
        ));
    }

    #[test]
    fn test_missing_parent_descriptor() {
        let container = Container::builder(
            DescriptorRegistry::new().with("orphan", ComponentDescriptor::new().with_parent("nobody")),
            FnCreator::new(),
        )
        .build()
        .unwrap();

        let err = container.resolve("orphan").unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvableParent { .. }));
    }

    #[test]
    fn test_child_overrides_parent_container() {
        let root = Container::builder(
            DescriptorRegistry::new()
                .with("db", ComponentDescriptor::new())
                .with("cache", ComponentDescriptor::new()),
            FnCreator::new()
                .with("db", |_| Ok(Instance::new(Database { url: "production".into() })))
                .with("cache", |_| Ok(Instance::new(0u32))),
        )
        .build()
        .unwrap();

        let test_scope = root
            .child(
                DescriptorRegistry::new().with("db", ComponentDescriptor::new()),
                FnCreator::new().with("db", |_| Ok(Instance::new(Database { url: "test".into() }))),
            )
            .build()
            .unwrap();

        assert_eq!(root.get::<Database>("db").unwrap().url, "production");
        assert_eq!(test_scope.get::<Database>("db").unwrap().url, "test");
        assert!(root.resolve("cache").unwrap().ptr_eq(&test_scope.resolve("cache").unwrap()));
    }

    #[test]
    fn test_alias_cycle_rejected() {
        let container = Container::builder(DescriptorRegistry::new(), FnCreator::new())
            .build()
            .unwrap();

        container.register_alias("a", "b").unwrap();
        container.register_alias("a", "b").unwrap();
        assert!(matches!(
            container.register_alias("b", "a").unwrap_err(),
            ResolveError::CircularAlias { .. }
        ));
        assert_eq!(container.canonical_name("b"), "a");
    }

    #[test]
    fn test_alias_overriding_disabled() {
        let container = Container::builder(DescriptorRegistry::new(), FnCreator::new())
            .allow_alias_overriding(false)
            .build()
            .unwrap();

        container.register_alias("first", "alias").unwrap();
        assert!(matches!(
            container.register_alias("second", "alias").unwrap_err(),
            ResolveError::AliasConflict { .. }
        ));
        assert_eq!(container.canonical_name("alias"), "first");
    }

    #[test]
    fn test_thread_scope_per_thread_instances() {
        let container = Container::builder(
            DescriptorRegistry::new().with("local", ComponentDescriptor::new().scoped("thread")),
            FnCreator::new().with("local", |_| Ok(Instance::new(thread::current().id()))),
        )
        .scope("thread", Arc::new(ThreadScope::new()))
        .build()
        .unwrap();

        let here = container.resolve("local").unwrap();
        assert!(here.ptr_eq(&container.resolve("local").unwrap()));

        let there = thread::scope(|s| s.spawn(|| container.resolve("local").unwrap()).join().unwrap());
        assert!(!here.ptr_eq(&there));
        assert_ne!(
            here.downcast_ref::<thread::ThreadId>(),
            there.downcast_ref::<thread::ThreadId>()
        );
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let container = Container::builder(
            DescriptorRegistry::new().with("n", ComponentDescriptor::new().with_scope(ScopeKind::parse(ScopeKind::PROTOTYPE))),
            FnCreator::new().with("n", |_| Ok(Instance::new(1i64))),
        )
        .build()
        .unwrap();

        let n: Arc<i64> = container.get("n").unwrap();
        assert_eq!(*n, 1);
    }
}
