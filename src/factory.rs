//! Indirect factory components
//!
//! A component whose instance implements [`FactoryComponent`] is not handed out
//! directly: resolving its plain name yields the factory's product, while the
//! dereference form (`&name`) yields the factory itself.

use crate::descriptor::ComponentType;
use crate::error::{BoxError, ResolveError, Result};
use crate::instance::Instance;
use crate::storage::name_map;
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::ReentrantMutex;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Prefix that requests the factory instead of its product
pub const FACTORY_PREFIX: &str = "&";

/// Whether `name` is in dereference form
#[inline]
pub fn is_factory_dereference(name: &str) -> bool {
    name.starts_with(FACTORY_PREFIX)
}

/// Strip every leading dereference prefix
#[inline]
pub(crate) fn strip_factory_prefix(name: &str) -> &str {
    name.trim_start_matches(FACTORY_PREFIX)
}

/// A component that produces another object on demand
pub trait FactoryComponent: Send + Sync + 'static {
    /// Produce the object
    fn get_object(&self) -> std::result::Result<Instance, BoxError>;

    /// Type of the produced object, if known up front
    fn object_type(&self) -> Option<ComponentType>;

    /// Whether every call returns the same shared object
    fn is_singleton(&self) -> bool {
        true
    }

    fn is_prototype(&self) -> bool {
        false
    }
}

// =============================================================================
// Product cache
// =============================================================================

/// Cache of objects produced by singleton factories, keyed by factory name.
///
/// Each entry remembers the factory that produced it, so a recreated factory
/// never sees its predecessor's product. Production is serialized per name
/// only; factories under different names produce concurrently.
pub(crate) struct FactoryProducts {
    products: DashMap<String, (Arc<dyn FactoryComponent>, Instance), RandomState>,
    locks: DashMap<String, Arc<ReentrantMutex<()>>, RandomState>,
}

impl FactoryProducts {
    pub fn new() -> Self {
        Self {
            products: name_map(0),
            locks: name_map(0),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<ReentrantMutex<()>> {
        Arc::clone(
            self.locks
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
                .value(),
        )
    }

    /// Previously produced object of `factory` under `name`
    #[inline]
    pub fn cached(&self, name: &str, factory: &Arc<dyn FactoryComponent>) -> Option<Instance> {
        self.products
            .get(name)
            .filter(|entry| std::ptr::addr_eq(Arc::as_ptr(&entry.0), Arc::as_ptr(factory)))
            .map(|entry| entry.1.clone())
    }

    /// Obtain the product of `factory`.
    ///
    /// With `cache` set and a singleton factory, `get_object` runs at most once
    /// per name; otherwise it runs on every call.
    pub fn get_object(
        &self,
        factory: &Arc<dyn FactoryComponent>,
        name: &str,
        cache: bool,
    ) -> Result<Instance> {
        if !(cache && factory.is_singleton()) {
            return Self::produce(factory, name);
        }

        if let Some(product) = self.cached(name, factory) {
            #[cfg(feature = "logging")]
            trace!(
                target: "component_resolver",
                component = name,
                "Returning cached factory product"
            );
            return Ok(product);
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock();
        if let Some(product) = self.cached(name, factory) {
            return Ok(product);
        }

        let product = Self::produce(factory, name)?;

        // A reentrant call may have cached a product while this one was produced
        let product = match self.products.entry(name.to_owned()) {
            Entry::Occupied(entry)
                if std::ptr::addr_eq(Arc::as_ptr(&entry.get().0), Arc::as_ptr(factory)) =>
            {
                entry.get().1.clone()
            }
            Entry::Occupied(mut entry) => {
                entry.insert((Arc::clone(factory), product.clone()));
                product
            }
            Entry::Vacant(entry) => {
                entry.insert((Arc::clone(factory), product.clone()));
                product
            }
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            component = name,
            product = product.type_name(),
            "Cached factory product"
        );

        Ok(product)
    }

    fn produce(factory: &Arc<dyn FactoryComponent>, name: &str) -> Result<Instance> {
        factory
            .get_object()
            .map_err(|e| ResolveError::factory_product(name, e))
    }

    pub fn remove(&self, name: &str) {
        self.products.remove(name);
        self.locks.remove(name);
    }

    pub fn clear(&self) {
        self.products.clear();
        self.locks.clear();
    }

    /// Keep only products whose factory name passes `live`
    pub fn retain<F: Fn(&str) -> bool>(&self, live: F) {
        self.products.retain(|name, _| live(name.as_str()));
        self.locks.retain(|name, _| live(name.as_str()));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.products.len()
    }
}
