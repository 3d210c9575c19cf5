//! Thread-local prototype creation markers
//!
//! A prototype that requests itself while it is being built can never finish,
//! so every prototype creation is bracketed by markers. Markers are per thread
//! and per container: the same name may be in creation on two threads, or in
//! two containers on one thread, without either seeing the other.

use ahash::{AHashMap, AHashSet};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Names in creation for one container on one thread.
///
/// A single name is by far the common case and avoids allocating a set.
enum InCreation {
    Single(String),
    Many(AHashSet<String>),
}

thread_local! {
    static PROTOTYPES_IN_CREATION: RefCell<AHashMap<u64, InCreation>> =
        RefCell::new(AHashMap::new());
}

/// Tracks prototypes currently being created, per thread
#[derive(Debug)]
pub(crate) struct PrototypeTracker {
    id: u64,
}

impl PrototypeTracker {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Whether `name` is in creation on the calling thread
    pub fn is_in_creation(&self, name: &str) -> bool {
        PROTOTYPES_IN_CREATION.with(|markers| match markers.borrow().get(&self.id) {
            Some(InCreation::Single(current)) => current == name,
            Some(InCreation::Many(set)) => set.contains(name),
            None => false,
        })
    }

    pub fn before_creation(&self, name: &str) {
        PROTOTYPES_IN_CREATION.with(|markers| {
            let mut markers = markers.borrow_mut();
            match markers.remove(&self.id) {
                None => {
                    markers.insert(self.id, InCreation::Single(name.to_owned()));
                }
                Some(InCreation::Single(current)) => {
                    let mut set = AHashSet::with_capacity(2);
                    set.insert(current);
                    set.insert(name.to_owned());
                    markers.insert(self.id, InCreation::Many(set));
                }
                Some(InCreation::Many(mut set)) => {
                    set.insert(name.to_owned());
                    markers.insert(self.id, InCreation::Many(set));
                }
            }
        });
    }

    pub fn after_creation(&self, name: &str) {
        PROTOTYPES_IN_CREATION.with(|markers| {
            let mut markers = markers.borrow_mut();
            match markers.remove(&self.id) {
                Some(InCreation::Single(current)) if current != name => {
                    markers.insert(self.id, InCreation::Single(current));
                }
                Some(InCreation::Many(mut set)) => {
                    set.remove(name);
                    if !set.is_empty() {
                        markers.insert(self.id, InCreation::Many(set));
                    }
                }
                _ => {}
            }
        });
    }

    /// Mark `name` as in creation until the returned guard drops
    pub fn enter<'a>(&'a self, name: &'a str) -> PrototypeGuard<'a> {
        self.before_creation(name);
        PrototypeGuard { tracker: self, name }
    }
}

/// Clears a prototype marker on drop, including on early return or panic
pub(crate) struct PrototypeGuard<'a> {
    tracker: &'a PrototypeTracker,
    name: &'a str,
}

impl Drop for PrototypeGuard<'_> {
    fn drop(&mut self) {
        self.tracker.after_creation(self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_marker() {
        let tracker = PrototypeTracker::new();
        assert!(!tracker.is_in_creation("a"));

        tracker.before_creation("a");
        assert!(tracker.is_in_creation("a"));
        assert!(!tracker.is_in_creation("b"));

        tracker.after_creation("a");
        assert!(!tracker.is_in_creation("a"));
    }

    #[test]
    fn test_nested_markers() {
        let tracker = PrototypeTracker::new();
        let _a = tracker.enter("a");
        {
            let _b = tracker.enter("b");
            assert!(tracker.is_in_creation("a"));
            assert!(tracker.is_in_creation("b"));
        }
        assert!(tracker.is_in_creation("a"));
        assert!(!tracker.is_in_creation("b"));
    }

    #[test]
    fn test_trackers_are_isolated() {
        let first = PrototypeTracker::new();
        let second = PrototypeTracker::new();

        let _guard = first.enter("a");
        assert!(first.is_in_creation("a"));
        assert!(!second.is_in_creation("a"));
    }

    #[test]
    fn test_markers_are_thread_local() {
        let tracker = std::sync::Arc::new(PrototypeTracker::new());
        let _guard = tracker.enter("a");

        let other = std::sync::Arc::clone(&tracker);
        let seen = std::thread::spawn(move || other.is_in_creation("a"))
            .join()
            .unwrap();
        assert!(!seen);
    }

    #[test]
    fn test_guard_clears_on_panic() {
        let tracker = std::sync::Arc::new(PrototypeTracker::new());
        let inner = std::sync::Arc::clone(&tracker);

        let result = std::panic::catch_unwind(move || {
            let _guard = inner.enter("boom");
            panic!("creation failed");
        });

        assert!(result.is_err());
        assert!(!tracker.is_in_creation("boom"));
    }
}
