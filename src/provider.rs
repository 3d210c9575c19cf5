//! Creation capability
//!
//! The engine never builds instances itself. It hands a [`CreationRequest`] to
//! the container's [`ComponentCreator`], which may resolve collaborators through
//! the same container and expose an early reference to break circular
//! references between singletons.

use crate::container::Container;
use crate::descriptor::{ComponentType, MergedDescriptor};
use crate::error::{ResolveError, Result};
use crate::instance::Instance;
use crate::storage::name_map;
use ahash::RandomState;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

/// Explicit construction argument
pub type Argument = Arc<dyn Any + Send + Sync>;

/// Everything a creator needs to build one component
pub struct CreationRequest<'a> {
    pub container: &'a Container,
    pub name: &'a str,
    pub descriptor: &'a Arc<MergedDescriptor>,
    pub args: Option<&'a [Argument]>,
}

impl CreationRequest<'_> {
    /// Resolve a collaborator through the requesting container.
    ///
    /// The collaborator is recorded as a dependency of the component being
    /// created, so destroying it (or failing to finish it) evicts this one too.
    pub fn resolve(&self, name: &str) -> Result<Instance> {
        let instance = self.container.resolve(name)?;
        self.container.register_dependent(name, self.name);
        Ok(instance)
    }

    /// Resolve and downcast a collaborator, recording the dependency
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let instance = self.container.get::<T>(name)?;
        self.container.register_dependent(name, self.name);
        Ok(instance)
    }

    /// Expose a partially-initialized instance so circular references can see it.
    ///
    /// Only effective while this thread is creating the singleton `name`.
    #[inline]
    pub fn expose_early(&self, instance: Instance) -> bool {
        self.container.register_early_singleton(self.name, instance)
    }

    /// Explicit argument at `index`, downcast to `T`
    pub fn arg<T: Send + Sync + 'static>(&self, index: usize) -> Option<Arc<T>> {
        self.args
            .and_then(|args| args.get(index))
            .and_then(|arg| Arc::clone(arg).downcast::<T>().ok())
    }

    /// Descriptor property, if set
    #[inline]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.descriptor.property(key)
    }
}

/// Builds, predicts and destroys component instances
pub trait ComponentCreator: Send + Sync {
    /// Build the instance described by `request`
    fn create(&self, request: &CreationRequest<'_>) -> Result<Instance>;

    /// Type the component will have, without creating it
    fn predict_type(&self, _name: &str, descriptor: &MergedDescriptor) -> Option<ComponentType> {
        if descriptor.factory_method().is_some() {
            return None;
        }
        descriptor.component_type()
    }

    /// Type an indirect factory component will produce, without creating it
    fn predict_product_type(&self, _name: &str, _descriptor: &MergedDescriptor) -> Option<ComponentType> {
        None
    }

    /// Whether `instance` needs a destruction callback
    fn requires_destruction(&self, _name: &str, _instance: &Instance, _descriptor: &MergedDescriptor) -> bool {
        false
    }

    /// Tear down an instance previously created by this creator
    fn destroy(&self, _name: &str, _instance: &Instance) {}
}

impl<C: ComponentCreator + ?Sized> ComponentCreator for Arc<C> {
    fn create(&self, request: &CreationRequest<'_>) -> Result<Instance> {
        (**self).create(request)
    }

    fn predict_type(&self, name: &str, descriptor: &MergedDescriptor) -> Option<ComponentType> {
        (**self).predict_type(name, descriptor)
    }

    fn predict_product_type(&self, name: &str, descriptor: &MergedDescriptor) -> Option<ComponentType> {
        (**self).predict_product_type(name, descriptor)
    }

    fn requires_destruction(&self, name: &str, instance: &Instance, descriptor: &MergedDescriptor) -> bool {
        (**self).requires_destruction(name, instance, descriptor)
    }

    fn destroy(&self, name: &str, instance: &Instance) {
        (**self).destroy(name, instance)
    }
}

// =============================================================================
// Closure-backed creator
// =============================================================================

type CreateFn = Arc<dyn Fn(&CreationRequest<'_>) -> Result<Instance> + Send + Sync>;
type DestroyFn = Arc<dyn Fn(&Instance) + Send + Sync>;

/// Creator that maps component names to closures
///
/// # Examples
///
/// ```rust
/// use component_resolver::{FnCreator, Instance};
///
/// let creator = FnCreator::new()
///     .with("greeting", |_| Ok(Instance::new(String::from("hello"))))
///     .with_destroy("greeting", |_| println!("bye"));
/// assert!(creator.contains("greeting"));
/// ```
pub struct FnCreator {
    creators: DashMap<String, CreateFn, RandomState>,
    destroyers: DashMap<String, DestroyFn, RandomState>,
}

impl FnCreator {
    pub fn new() -> Self {
        Self {
            creators: name_map(0),
            destroyers: name_map(0),
        }
    }

    /// Register the closure that builds `name`
    pub fn register<F>(&self, name: impl Into<String>, create: F)
    where
        F: Fn(&CreationRequest<'_>) -> Result<Instance> + Send + Sync + 'static,
    {
        self.creators.insert(name.into(), Arc::new(create));
    }

    /// Builder-style [`register`](Self::register)
    pub fn with<F>(self, name: impl Into<String>, create: F) -> Self
    where
        F: Fn(&CreationRequest<'_>) -> Result<Instance> + Send + Sync + 'static,
    {
        self.register(name, create);
        self
    }

    /// Register a destruction callback for `name`
    pub fn with_destroy<F>(self, name: impl Into<String>, destroy: F) -> Self
    where
        F: Fn(&Instance) + Send + Sync + 'static,
    {
        self.destroyers.insert(name.into(), Arc::new(destroy));
        self
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.creators.contains_key(name)
    }
}

impl ComponentCreator for FnCreator {
    fn create(&self, request: &CreationRequest<'_>) -> Result<Instance> {
        // Clone out so no shard guard is held while the closure resolves collaborators.
        let create = self
            .creators
            .get(request.name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| {
                ResolveError::creation_failed(request.name, "no creation function registered")
            })?;
        create(request)
    }

    fn requires_destruction(&self, name: &str, _instance: &Instance, _descriptor: &MergedDescriptor) -> bool {
        self.destroyers.contains_key(name)
    }

    fn destroy(&self, name: &str, instance: &Instance) {
        let destroy = self.destroyers.get(name).map(|d| Arc::clone(d.value()));
        if let Some(destroy) = destroy {
            destroy(instance);
        }
    }
}

impl Default for FnCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FnCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCreator")
            .field("creators", &self.creators.len())
            .field("destroyers", &self.destroyers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ComponentDescriptor;

    struct NullCreator;

    impl ComponentCreator for NullCreator {
        fn create(&self, request: &CreationRequest<'_>) -> Result<Instance> {
            Err(ResolveError::creation_failed(request.name, "unsupported"))
        }
    }

    #[test]
    fn test_default_predict_type() {
        let plain = MergedDescriptor::flatten(ComponentDescriptor::new().with_type::<u64>(), None);
        let via_method = MergedDescriptor::flatten(
            ComponentDescriptor::new()
                .with_type::<u64>()
                .with_factory_method("build"),
            None,
        );

        assert_eq!(
            NullCreator.predict_type("a", &plain),
            Some(ComponentType::of::<u64>())
        );
        assert_eq!(NullCreator.predict_type("a", &via_method), None);
        assert_eq!(NullCreator.predict_product_type("a", &plain), None);
    }

    #[test]
    fn test_fn_creator_destroyers() {
        let creator = FnCreator::new()
            .with("a", |_| Ok(Instance::new(1u8)))
            .with_destroy("a", |_| {});
        let merged = MergedDescriptor::flatten(ComponentDescriptor::new(), None);
        let instance = Instance::new(1u8);

        assert!(creator.contains("a"));
        assert!(!creator.contains("b"));
        assert!(creator.requires_destruction("a", &instance, &merged));
        assert!(!creator.requires_destruction("b", &instance, &merged));
    }
}
