//! Circular references between singletons
//!
//! ```bash
//! cargo run --example circular
//! ```
//!
//! `Order` and `Customer` refer to each other. The order creator exposes its
//! half-built instance early so the customer can link back to it, then
//! completes the cycle through a `OnceLock`.

use component_resolver::{
    ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance, ResolveError,
};
use std::sync::{Arc, OnceLock};

struct Order {
    id: u32,
    customer: OnceLock<Arc<Customer>>,
}

struct Customer {
    name: String,
    last_order: Arc<Order>,
}

fn main() {
    let store = DescriptorRegistry::new()
        .with("order", ComponentDescriptor::new())
        .with("customer", ComponentDescriptor::new())
        .with("draft", ComponentDescriptor::new().prototype());

    let creator = FnCreator::new()
        .with("order", |req| {
            let order = Arc::new(Order {
                id: 7,
                customer: OnceLock::new(),
            });
            req.expose_early(Instance::from_arc(Arc::clone(&order)));

            let customer = req.get::<Customer>("customer")?;
            let _ = order.customer.set(customer);
            Ok(Instance::from_arc(order))
        })
        .with("customer", |req| {
            Ok(Instance::new(Customer {
                name: "Ada".into(),
                last_order: req.get::<Order>("order")?,
            }))
        })
        // A prototype cannot be exposed early, so this cycle is an error
        .with("draft", |req| {
            req.resolve("draft")?;
            Ok(Instance::new(()))
        });

    let container = Container::builder(store, creator).build().unwrap();

    let order = container.get::<Order>("order").unwrap();
    let customer = container.get::<Customer>("customer").unwrap();

    println!("order #{} belongs to {}", order.id, customer.name);
    println!(
        "customer's last order is the same instance: {}",
        Arc::ptr_eq(&customer.last_order, &order)
    );
    println!(
        "order links back to the customer: {}",
        order
            .customer
            .get()
            .is_some_and(|c| Arc::ptr_eq(c, &customer))
    );

    match container.resolve("draft") {
        Err(e @ ResolveError::CircularPrototype { .. }) => println!("draft: {e}"),
        other => println!("draft: unexpected {other:?}"),
    }
}
