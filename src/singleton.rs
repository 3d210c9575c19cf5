//! Per-container singleton cache and creation tracking
//!
//! Creation of a singleton is serialized per name. The first caller claims a
//! creation slot and runs the creation callback; callers on other threads
//! block on the slot and observe the same outcome. While a thread owns a slot
//! it may expose an early reference, which is what lets two singletons refer
//! to each other.

use crate::error::{ResolveError, Result};
use crate::graph::DependencyGraph;
use crate::instance::Instance;
use crate::storage::name_map;
use ahash::{AHashMap, AHashSet, RandomState};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Callback run once when a component is destroyed
pub type DestructionCallback = Box<dyn FnOnce() + Send + Sync>;

/// One in-flight singleton creation
struct CreationSlot {
    owner: ThreadId,
    outcome: OnceCell<Result<Instance>>,
}

enum Claim {
    Owned(Arc<CreationSlot>),
    Busy(Arc<CreationSlot>),
}

pub(crate) struct SingletonRegistry {
    singletons: DashMap<String, Instance, RandomState>,
    early: DashMap<String, Instance, RandomState>,
    in_creation: DashMap<String, Arc<CreationSlot>, RandomState>,
    /// Which name each blocked thread is waiting for
    waiting: Mutex<AHashMap<ThreadId, String>>,
    registered: Mutex<IndexSet<String, RandomState>>,
    disposables: Mutex<IndexMap<String, DestructionCallback, RandomState>>,
    graph: DependencyGraph,
    in_destruction: AtomicBool,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self {
            singletons: name_map(0),
            early: name_map(0),
            in_creation: name_map(0),
            waiting: Mutex::new(AHashMap::new()),
            registered: Mutex::new(IndexSet::with_hasher(RandomState::new())),
            disposables: Mutex::new(IndexMap::with_hasher(RandomState::new())),
            graph: DependencyGraph::new(),
            in_destruction: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Finished instance, or the early reference when the calling thread is creating it
    pub fn get(&self, name: &str) -> Option<Instance> {
        if let Some(instance) = self.singletons.get(name) {
            return Some(instance.value().clone());
        }
        if self.is_owned_by_current_thread(name) {
            return self.early.get(name).map(|e| e.value().clone());
        }
        None
    }

    /// Finished instance only
    #[inline]
    pub fn peek(&self, name: &str) -> Option<Instance> {
        self.singletons.get(name).map(|i| i.value().clone())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.singletons.contains_key(name)
    }

    #[inline]
    pub fn is_in_creation(&self, name: &str) -> bool {
        self.in_creation.contains_key(name)
    }

    fn is_owned_by_current_thread(&self, name: &str) -> bool {
        let me = thread::current().id();
        self.in_creation
            .get(name)
            .is_some_and(|slot| slot.owner == me)
    }

    /// Publish a partially-initialized instance; only the creating thread may do so
    pub fn expose_early(&self, name: &str, instance: Instance) -> bool {
        if !self.is_owned_by_current_thread(name) {
            return false;
        }
        self.early.insert(name.to_owned(), instance);

        #[cfg(feature = "logging")]
        trace!(
            target: "component_resolver",
            component = name,
            "Exposed early singleton reference"
        );

        true
    }

    /// Register a fully built instance from outside the creation path
    pub fn register(&self, name: &str, instance: Instance) -> Result<()> {
        match self.singletons.entry(name.to_owned()) {
            Entry::Occupied(_) => {
                return Err(ResolveError::SingletonExists {
                    name: name.to_owned(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(instance);
            }
        }
        self.early.remove(name);
        self.registered.lock().insert(name.to_owned());
        Ok(())
    }

    fn add(&self, name: &str, instance: Instance) {
        self.singletons.insert(name.to_owned(), instance);
        self.early.remove(name);
        self.registered.lock().insert(name.to_owned());
    }

    /// Drop the cached instance and any early reference
    pub fn remove(&self, name: &str) {
        self.singletons.remove(name);
        self.early.remove(name);
        self.registered.lock().shift_remove(name);
    }

    /// Return the cached instance or run `create` exactly once for `name`.
    ///
    /// On failure the early reference and every singleton that depends on
    /// `name` are evicted before the error is returned.
    pub fn get_or_create<F>(&self, name: &str, create: F) -> Result<Instance>
    where
        F: FnOnce() -> Result<Instance>,
    {
        if let Some(instance) = self.peek(name) {
            return Ok(instance);
        }
        if self.in_destruction.load(Ordering::Acquire) {
            return Err(ResolveError::InDestruction {
                name: name.to_owned(),
            });
        }

        let me = thread::current().id();
        let claim = match self.in_creation.entry(name.to_owned()) {
            Entry::Occupied(entry) => Claim::Busy(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let slot = Arc::new(CreationSlot {
                    owner: me,
                    outcome: OnceCell::new(),
                });
                entry.insert(Arc::clone(&slot));
                Claim::Owned(slot)
            }
        };

        match claim {
            Claim::Busy(slot) => self.await_creation(name, me, &slot),
            Claim::Owned(slot) => {
                let guard = SlotGuard {
                    registry: self,
                    name,
                    slot,
                };

                // Another thread may have finished between the lookup and the claim.
                if let Some(instance) = self.peek(name) {
                    guard.finish(Ok(instance.clone()));
                    return Ok(instance);
                }

                #[cfg(feature = "logging")]
                debug!(
                    target: "component_resolver",
                    component = name,
                    "Creating shared instance of singleton"
                );

                let result = create();
                match &result {
                    Ok(instance) => self.add(name, instance.clone()),
                    Err(_e) => {
                        #[cfg(feature = "logging")]
                        debug!(
                            target: "component_resolver",
                            component = name,
                            error = %_e,
                            "Singleton creation failed, evicting dependents"
                        );
                        self.early.remove(name);
                        self.destroy_singleton(name);
                    }
                }
                guard.finish(result.clone());
                result
            }
        }
    }

    fn await_creation(&self, name: &str, me: ThreadId, slot: &Arc<CreationSlot>) -> Result<Instance> {
        if slot.owner == me {
            return Err(ResolveError::CurrentlyInCreation {
                name: name.to_owned(),
            });
        }

        {
            let mut waiting = self.waiting.lock();
            if self.would_deadlock(&waiting, me, slot.owner) {
                drop(waiting);
                #[cfg(feature = "logging")]
                debug!(
                    target: "component_resolver",
                    component = name,
                    "Cross-thread creation cycle, falling back to early reference"
                );
                return self
                    .early
                    .get(name)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| ResolveError::CurrentlyInCreation {
                        name: name.to_owned(),
                    });
            }
            waiting.insert(me, name.to_owned());
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "component_resolver",
            component = name,
            "Waiting for singleton creation on another thread"
        );

        let outcome = slot.outcome.wait().clone();
        self.waiting.lock().remove(&me);
        outcome
    }

    /// Whether blocking on a slot owned by `owner` closes a waits-for cycle back to `me`
    fn would_deadlock(&self, waiting: &AHashMap<ThreadId, String>, me: ThreadId, owner: ThreadId) -> bool {
        let mut current = owner;
        let mut seen = AHashSet::new();
        loop {
            if current == me {
                return true;
            }
            if !seen.insert(current) {
                return false;
            }
            let Some(name) = waiting.get(&current) else {
                return false;
            };
            let Some(next) = self.in_creation.get(name).map(|slot| slot.owner) else {
                return false;
            };
            current = next;
        }
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Register a callback to run when `name` is destroyed
    pub fn register_disposable(&self, name: &str, callback: DestructionCallback) {
        self.disposables.lock().insert(name.to_owned(), callback);
    }

    #[inline]
    pub fn has_disposable(&self, name: &str) -> bool {
        self.disposables.lock().contains_key(name)
    }

    /// Destroy `name`, destroying the singletons that depend on it first
    pub fn destroy_singleton(&self, name: &str) {
        self.remove(name);

        let callback = self.disposables.lock().shift_remove(name);

        for dependent in self.graph.take_dependents(name) {
            self.destroy_singleton(&dependent);
        }

        if let Some(callback) = callback {
            #[cfg(feature = "logging")]
            debug!(
                target: "component_resolver",
                component = name,
                "Running destruction callback"
            );

            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                #[cfg(feature = "logging")]
                warn!(
                    target: "component_resolver",
                    component = name,
                    "Destruction callback panicked"
                );
            }
        }

        self.graph.forget(name);
    }

    /// Destroy every singleton: dependents first, then in reverse registration order
    pub fn destroy_singletons(&self) {
        self.in_destruction.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            singletons = self.singletons.len(),
            "Destroying singletons"
        );

        let names: Vec<String> = self.disposables.lock().keys().cloned().collect();
        for name in names.iter().rev() {
            self.destroy_singleton(name);
        }

        self.graph.clear();
        self.singletons.clear();
        self.early.clear();
        self.registered.lock().clear();

        self.in_destruction.store(false, Ordering::Release);
    }

    /// Names of all finished singletons, in registration order
    pub fn names(&self) -> Vec<String> {
        self.registered.lock().iter().cloned().collect()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.singletons.len()
    }
}

/// Releases a creation slot, also when the creation callback panics
struct SlotGuard<'a> {
    registry: &'a SingletonRegistry,
    name: &'a str,
    slot: Arc<CreationSlot>,
}

impl SlotGuard<'_> {
    fn finish(self, outcome: Result<Instance>) {
        let _ = self.slot.outcome.set(outcome);
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.slot.outcome.get().is_none() {
            self.registry.early.remove(self.name);
            let _ = self.slot.outcome.set(Err(ResolveError::creation_failed(
                self.name,
                "creation callback panicked",
            )));
        }
        self.registry
            .in_creation
            .remove_if(self.name, |_, slot| Arc::ptr_eq(slot, &self.slot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Mutex as StdMutex};

    #[test]
    fn test_create_once() {
        let registry = SingletonRegistry::new();
        let a = registry.get_or_create("a", || Ok(Instance::new(1u32))).unwrap();
        let b = registry
            .get_or_create("a", || panic!("must not run twice"))
            .unwrap();

        assert!(a.ptr_eq(&b));
        assert_eq!(registry.names(), vec!["a".to_string()]);
        assert!(!registry.is_in_creation("a"));
    }

    #[test]
    fn test_reentrant_request_without_early_reference() {
        let registry = SingletonRegistry::new();
        let err = registry
            .get_or_create("a", || registry.get_or_create("a", || Ok(Instance::new(0u8))))
            .unwrap_err();

        assert!(matches!(err, ResolveError::CurrentlyInCreation { .. }));
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_early_reference_visible_to_owner_only() {
        let registry = Arc::new(SingletonRegistry::new());
        let inner = Arc::clone(&registry);

        registry
            .get_or_create("a", || {
                let early = Instance::new(5u32);
                assert!(inner.expose_early("a", early.clone()));
                assert!(inner.get("a").unwrap().ptr_eq(&early));

                let other = Arc::clone(&inner);
                let seen = thread::spawn(move || other.get("a").is_some())
                    .join()
                    .unwrap();
                assert!(!seen);
                Ok(early)
            })
            .unwrap();

        assert!(!registry.expose_early("a", Instance::new(6u32)));
    }

    #[test]
    fn test_concurrent_creation_runs_once() {
        let registry = Arc::new(SingletonRegistry::new());
        let created = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let created = Arc::clone(&created);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .get_or_create("shared", || {
                            created.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(10));
                            Ok(Instance::new(String::from("shared")))
                        })
                        .unwrap()
                })
            })
            .collect();

        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(instances.iter().all(|i| i.ptr_eq(&instances[0])));
    }

    #[test]
    fn test_failure_evicts_dependents() {
        let registry = SingletonRegistry::new();
        registry.register("repo", Instance::new(1u8)).unwrap();
        registry.graph().register("db", "repo");

        let err = registry
            .get_or_create("db", || Err(ResolveError::creation_failed("db", "down")))
            .unwrap_err();

        assert!(matches!(err, ResolveError::CreationFailed { .. }));
        assert!(!registry.contains("repo"));
        assert!(!registry.contains("db"));

        // Failures are not cached
        registry.get_or_create("db", || Ok(Instance::new(2u8))).unwrap();
        assert!(registry.contains("db"));
    }

    #[test]
    fn test_panic_releases_slot() {
        let registry = SingletonRegistry::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = registry.get_or_create("a", || panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(!registry.is_in_creation("a"));
        registry.get_or_create("a", || Ok(Instance::new(1u8))).unwrap();
    }

    #[test]
    fn test_register_duplicate() {
        let registry = SingletonRegistry::new();
        registry.register("a", Instance::new(1u8)).unwrap();
        let err = registry.register("a", Instance::new(2u8)).unwrap_err();
        assert!(matches!(err, ResolveError::SingletonExists { .. }));
    }

    #[test]
    fn test_destroy_order() {
        let registry = SingletonRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        for name in ["db", "cache", "repo"] {
            registry.register(name, Instance::new(name.to_string())).unwrap();
            let log = Arc::clone(&log);
            registry.register_disposable(name, Box::new(move || log.lock().unwrap().push(name)));
        }
        // repo depends on db: repo must go before db even though db was registered first
        registry.graph().register("db", "repo");

        registry.destroy_singletons();

        assert_eq!(*log.lock().unwrap(), vec!["repo", "cache", "db"]);
        assert_eq!(registry.count(), 0);
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_disposable_replaced_in_place() {
        let registry = SingletonRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            registry.register_disposable(name, Box::new(move || log.lock().unwrap().push(name)));
        }
        // Replacing a callback keeps its original position
        let replaced = Arc::clone(&log);
        registry.register_disposable("a", Box::new(move || replaced.lock().unwrap().push("a2")));

        registry.destroy_singletons();
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a2"]);
    }

    #[test]
    fn test_destroy_singleton_runs_dependents_first() {
        let registry = SingletonRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));

        for name in ["db", "repo", "service"] {
            registry.register(name, Instance::new(0u8)).unwrap();
            let log = Arc::clone(&log);
            registry.register_disposable(name, Box::new(move || log.lock().unwrap().push(name)));
        }
        registry.graph().register("db", "repo");
        registry.graph().register("repo", "service");

        registry.destroy_singleton("db");

        assert_eq!(*log.lock().unwrap(), vec!["service", "repo", "db"]);
        assert_eq!(registry.count(), 0);
        assert!(!registry.has_disposable("db"));
    }
}
