//! Descriptor merging
//!
//! A child descriptor names a parent and overrides part of it. Merging folds
//! the parent chain into one [`MergedDescriptor`]. Top-level results are cached
//! per name; the cache and the set of names already marked as created share a
//! single reentrant lock, since merging a child re-enters to merge its parent.

use crate::descriptor::{ComponentDescriptor, MergedDescriptor};
use crate::error::{ResolveError, Result};
use crate::storage::name_map;
use ahash::RandomState;
use dashmap::{DashMap, DashSet};
use parking_lot::ReentrantMutex;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

pub(crate) struct DescriptorMerger {
    merged: DashMap<String, Arc<MergedDescriptor>, RandomState>,
    created: DashSet<String, RandomState>,
    lock: ReentrantMutex<()>,
    cache_metadata: bool,
}

impl DescriptorMerger {
    pub fn new(cache_metadata: bool) -> Self {
        Self {
            merged: name_map(0),
            created: DashSet::with_hasher(RandomState::new()),
            lock: ReentrantMutex::new(()),
            cache_metadata,
        }
    }

    #[inline]
    pub fn cached(&self, name: &str) -> Option<Arc<MergedDescriptor>> {
        self.merged.get(name).map(|m| Arc::clone(m.value()))
    }

    /// Merge `descriptor` (registered as `name`) with its parent chain.
    ///
    /// `parent_of` produces the merged parent for a parent name. A missing
    /// parent is reported as `UnresolvableParent`. With `containing` set the
    /// result is a nested descriptor and is never cached.
    pub fn merge<P>(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
        containing: Option<&MergedDescriptor>,
        parent_of: P,
    ) -> Result<Arc<MergedDescriptor>>
    where
        P: FnOnce(&str) -> Result<Arc<MergedDescriptor>>,
    {
        let _guard = self.lock.lock();

        if containing.is_none() {
            if let Some(merged) = self.cached(name) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "component_resolver",
                    component = name,
                    "Using cached merged descriptor"
                );
                return Ok(merged);
            }
        }

        let flat = match descriptor.parent.as_deref() {
            None => descriptor.clone(),
            Some(parent_name) => {
                let parent = parent_of(parent_name).map_err(|e| match e {
                    ResolveError::NotFound { .. } => ResolveError::UnresolvableParent {
                        name: name.to_owned(),
                        parent: parent_name.to_owned(),
                        reason: e.to_string(),
                    },
                    other => other,
                })?;

                #[cfg(feature = "logging")]
                debug!(
                    target: "component_resolver",
                    component = name,
                    parent = parent_name,
                    "Merging child descriptor with parent"
                );

                let mut flat = parent.to_descriptor();
                flat.override_from(descriptor);
                flat
            }
        };

        let merged = Arc::new(MergedDescriptor::flatten(flat, containing));
        if containing.is_none() && self.cache_metadata {
            self.merged.insert(name.to_owned(), Arc::clone(&merged));
        }
        Ok(merged)
    }

    /// Record that `name` is about to be created; drops its cached merge once.
    ///
    /// Returns true only for the call that did the marking.
    pub fn mark_as_created(&self, name: &str) -> bool {
        if self.created.contains(name) {
            return false;
        }
        let _guard = self.lock.lock();
        if self.created.contains(name) {
            return false;
        }
        // Re-merge on the real creation in case metadata changed meanwhile.
        self.merged.remove(name);
        self.created.insert(name.to_owned())
    }

    pub fn cleanup_after_failure(&self, name: &str) {
        let _guard = self.lock.lock();
        self.created.remove(name);
    }

    /// Whether `name` has been marked as created
    #[inline]
    pub fn is_created(&self, name: &str) -> bool {
        self.created.contains(name)
    }

    #[inline]
    pub fn has_creation_started(&self) -> bool {
        !self.created.is_empty()
    }

    pub fn invalidate(&self, name: &str) {
        let _guard = self.lock.lock();
        self.merged.remove(name);
    }

    /// Drop cached merges for every name not yet marked as created
    pub fn clear_ineligible(&self) {
        let _guard = self.lock.lock();
        self.merged.retain(|name, _| self.created.contains(name));
    }

    #[inline]
    pub fn cached_count(&self) -> usize {
        self.merged.len()
    }
}
