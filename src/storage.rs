//! Descriptor storage
//!
//! The engine only ever talks to the [`DescriptorStore`] trait. The bundled
//! [`DescriptorRegistry`] uses DashMap for lock-free concurrent access.

use crate::descriptor::ComponentDescriptor;
use crate::error::{ResolveError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

/// Source of raw component descriptors, keyed by canonical name
pub trait DescriptorStore: Send + Sync {
    /// Whether a descriptor is registered under `name`
    fn contains_descriptor(&self, name: &str) -> bool;

    /// Raw descriptor for `name`, or [`ResolveError::NotFound`]
    fn descriptor(&self, name: &str) -> Result<Arc<ComponentDescriptor>>;

    /// Every registered name
    fn descriptor_names(&self) -> Vec<String>;
}

/// Pick a shard count for the expected number of entries.
///
/// Default DashMap uses num_cpus * 4 shards which is overkill for
/// typical containers with a few dozen components.
#[inline]
pub(crate) fn shard_amount(capacity: usize) -> usize {
    if capacity <= 16 {
        8
    } else if capacity <= 64 {
        16
    } else {
        32
    }
}

/// Build a name-keyed map with the crate's hasher and shard sizing
#[inline]
pub(crate) fn name_map<V>(capacity: usize) -> DashMap<String, V, RandomState> {
    DashMap::with_capacity_and_hasher_and_shard_amount(
        capacity,
        RandomState::new(),
        shard_amount(capacity),
    )
}

/// Thread-safe in-memory descriptor store
pub struct DescriptorRegistry {
    descriptors: DashMap<String, Arc<ComponentDescriptor>, RandomState>,
}

impl DescriptorRegistry {
    /// Create new empty registry with optimized shard count.
    #[inline]
    pub fn new() -> Self {
        Self {
            descriptors: name_map(0),
        }
    }

    /// Create with pre-allocated capacity and shards scaled to it.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descriptors: name_map(capacity),
        }
    }

    /// Register (or replace) the descriptor for `name`
    #[inline]
    pub fn register(&self, name: impl Into<String>, descriptor: ComponentDescriptor) {
        self.descriptors.insert(name.into(), Arc::new(descriptor));
    }

    /// Builder-style registration
    #[inline]
    pub fn with(self, name: impl Into<String>, descriptor: ComponentDescriptor) -> Self {
        self.register(name, descriptor);
        self
    }

    /// Remove a descriptor
    #[inline]
    pub fn remove(&self, name: &str) -> bool {
        self.descriptors.remove(name).is_some()
    }

    /// Get number of registered descriptors
    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Clear all descriptors
    #[inline]
    pub fn clear(&self) {
        self.descriptors.clear();
    }
}

impl DescriptorStore for DescriptorRegistry {
    #[inline]
    fn contains_descriptor(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    #[inline]
    fn descriptor(&self, name: &str) -> Result<Arc<ComponentDescriptor>> {
        self.descriptors
            .get(name)
            .map(|d| Arc::clone(d.value()))
            .ok_or_else(|| ResolveError::not_found(name))
    }

    fn descriptor_names(&self) -> Vec<String> {
        self.descriptors.iter().map(|r| r.key().clone()).collect()
    }
}

impl<S: DescriptorStore + ?Sized> DescriptorStore for Arc<S> {
    fn contains_descriptor(&self, name: &str) -> bool {
        (**self).contains_descriptor(name)
    }

    fn descriptor(&self, name: &str) -> Result<Arc<ComponentDescriptor>> {
        (**self).descriptor(name)
    }

    fn descriptor_names(&self) -> Vec<String> {
        (**self).descriptor_names()
    }
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DescriptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorRegistry")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_and_get() {
        let registry = DescriptorRegistry::new();
        registry.register("pool", ComponentDescriptor::new().property("size", "4"));

        let descriptor = registry.descriptor("pool").unwrap();
        assert_eq!(descriptor.properties.get("size").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_registry_contains() {
        let registry = DescriptorRegistry::new();
        assert!(!registry.contains_descriptor("pool"));

        registry.register("pool", ComponentDescriptor::new());
        assert!(registry.contains_descriptor("pool"));
    }

    #[test]
    fn test_registry_missing_is_not_found() {
        let registry = DescriptorRegistry::new();
        let err = registry.descriptor("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_registry_remove() {
        let registry = DescriptorRegistry::with_capacity(100)
            .with("a", ComponentDescriptor::new())
            .with("b", ComponentDescriptor::new());
        assert_eq!(registry.len(), 2);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));

        let mut names = registry.descriptor_names();
        names.sort();
        assert_eq!(names, vec!["b".to_string()]);
    }

    #[test]
    fn test_shard_amount_scales() {
        assert_eq!(shard_amount(0), 8);
        assert_eq!(shard_amount(50), 16);
        assert_eq!(shard_amount(1000), 32);
    }
}
