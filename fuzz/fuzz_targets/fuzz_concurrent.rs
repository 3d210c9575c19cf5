#![no_main]

//! Fuzz target for concurrent resolution
//!
//! Threads resolve, alias and destroy components at random. Every thread that
//! resolves a singleton between destructions must see the same instance.

use arbitrary::Arbitrary;
use component_resolver::{ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    Resolve(u8),
    ResolvePrototype,
    TypeOf(u8),
    Alias { name: u8, alias: u8 },
    DestroyOne(u8),
    DestroyAll,
}

#[derive(Debug, Arbitrary)]
struct ConcurrentScenario {
    // Number of singletons (clamped to 1-8)
    singletons: u8,
    // Number of threads (clamped to 1-8)
    thread_count: u8,
    ops_per_thread: Vec<ThreadOp>,
}

fn component(n: u8, count: u8) -> String {
    format!("svc{}", n % count)
}

fuzz_target!(|scenario: ConcurrentScenario| {
    let count = (scenario.singletons % 8).max(1);
    let ids = Arc::new(AtomicU64::new(0));

    let store = DescriptorRegistry::new().with("proto", ComponentDescriptor::new().prototype());
    let creator = FnCreator::new();
    for n in 0..count {
        let name = component(n, count);
        // Each singleton depends on its predecessor
        let descriptor = match n {
            0 => ComponentDescriptor::new(),
            _ => ComponentDescriptor::new().depends_on([component(n - 1, count)]),
        };
        store.register(name.clone(), descriptor);
        let ids = Arc::clone(&ids);
        creator.register(name, move |_| Ok(Instance::new(ids.fetch_add(1, Ordering::SeqCst))));
    }
    creator.register("proto", |_| Ok(Instance::new(0u64)));

    let container = Container::builder(store, creator).build().unwrap();
    let thread_count = (scenario.thread_count % 8).max(1) as usize;
    let ops = scenario.ops_per_thread;

    thread::scope(|s| {
        for _ in 0..thread_count {
            let ops = ops.clone();
            let container = &container;
            s.spawn(move || {
                for op in ops.into_iter().take(50) {
                    match op {
                        ThreadOp::Resolve(n) => {
                            let _ = container.get::<u64>(&component(n, count));
                        }
                        ThreadOp::ResolvePrototype => {
                            let a = container.resolve("proto").unwrap();
                            let b = container.resolve("proto").unwrap();
                            assert!(!a.ptr_eq(&b));
                        }
                        ThreadOp::TypeOf(n) => {
                            let _ = container.type_of(&component(n, count));
                        }
                        ThreadOp::Alias { name, alias } => {
                            let _ = container
                                .register_alias(&component(name, count), &format!("alias{}", alias % 4));
                        }
                        ThreadOp::DestroyOne(n) => container.destroy_singleton(&component(n, count)),
                        ThreadOp::DestroyAll => container.destroy_singletons(),
                    }
                }
            });
        }
    });

    // Without further destruction every lookup agrees
    let name = component(0, count);
    if let Ok(first) = container.resolve(&name) {
        let second = container.resolve(&name).unwrap();
        assert!(first.ptr_eq(&second));
    }
});
