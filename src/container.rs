//! Component resolution container
//!
//! The `Container` turns names into live instances. It canonicalizes aliases,
//! merges descriptor hierarchies, dispatches to the component's scope,
//! unwraps indirect factories and coerces the result to the requested type.
//! Containers form a hierarchy: a name with no local descriptor is delegated
//! to the parent container as a whole.

use crate::alias::AliasRegistry;
use crate::convert::TypeConverter;
use crate::creation::PrototypeTracker;
use crate::descriptor::{ComponentDescriptor, ComponentType, MergedDescriptor, ScopeKind};
use crate::error::{ResolveError, Result, ScopeError};
use crate::factory::{FACTORY_PREFIX, FactoryProducts, is_factory_dereference, strip_factory_prefix};
use crate::instance::Instance;
use crate::merge::DescriptorMerger;
use crate::provider::{Argument, ComponentCreator, CreationRequest};
use crate::scope::{ScopeRegistry, ScopeStrategy};
use crate::singleton::{DestructionCallback, SingletonRegistry};
use crate::storage::DescriptorStore;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Container behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Cache merged descriptors of top-level components
    pub cache_metadata: bool,
    /// Let `register_alias` re-point an existing alias
    pub allow_alias_overriding: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            cache_metadata: true,
            allow_alias_overriding: true,
        }
    }
}

/// Builder for [`Container`]
///
/// # Examples
///
/// ```rust
/// use component_resolver::{ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance};
///
/// let store = DescriptorRegistry::new().with("greeting", ComponentDescriptor::new());
/// let creator = FnCreator::new().with("greeting", |_| Ok(Instance::new(String::from("hello"))));
///
/// let container = Container::builder(store, creator)
///     .cache_metadata(true)
///     .build()
///     .unwrap();
///
/// let greeting = container.get::<String>("greeting").unwrap();
/// assert_eq!(*greeting, "hello");
/// ```
pub struct ContainerBuilder {
    store: Arc<dyn DescriptorStore>,
    creator: Arc<dyn ComponentCreator>,
    parent: Option<Container>,
    converter: Option<Arc<dyn TypeConverter>>,
    scopes: Vec<(String, Arc<dyn ScopeStrategy>)>,
    config: ContainerConfig,
}

impl ContainerBuilder {
    /// Delegate names without a local descriptor to `parent`
    pub fn parent(mut self, parent: Container) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Converter consulted when a resolved instance has the wrong type
    pub fn converter(mut self, converter: impl TypeConverter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    /// Register a custom scope strategy
    pub fn scope(mut self, name: impl Into<String>, strategy: Arc<dyn ScopeStrategy>) -> Self {
        self.scopes.push((name.into(), strategy));
        self
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_metadata(mut self, enabled: bool) -> Self {
        self.config.cache_metadata = enabled;
        self
    }

    pub fn allow_alias_overriding(mut self, enabled: bool) -> Self {
        self.config.allow_alias_overriding = enabled;
        self
    }

    /// Build the container; fails when a scope uses a reserved name
    pub fn build(self) -> Result<Container> {
        let depth = self.parent.as_ref().map_or(0, |p| p.depth() + 1);

        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            depth = depth,
            descriptors = self.store.descriptor_names().len(),
            scopes = self.scopes.len(),
            "Creating component container"
        );

        let scopes = ScopeRegistry::new();
        for (name, strategy) in self.scopes {
            scopes.register(&name, strategy)?;
        }

        Ok(Container {
            inner: Arc::new(Inner {
                depth,
                store: self.store,
                creator: self.creator,
                converter: self.converter,
                parent: self.parent,
                aliases: AliasRegistry::with_overriding(self.config.allow_alias_overriding),
                merger: DescriptorMerger::new(self.config.cache_metadata),
                singletons: SingletonRegistry::new(),
                products: FactoryProducts::new(),
                prototypes: PrototypeTracker::new(),
                scopes,
                config: self.config,
            }),
        })
    }
}

// =============================================================================
// Container
// =============================================================================

struct Inner {
    depth: u32,
    store: Arc<dyn DescriptorStore>,
    creator: Arc<dyn ComponentCreator>,
    converter: Option<Arc<dyn TypeConverter>>,
    parent: Option<Container>,
    aliases: AliasRegistry,
    merger: DescriptorMerger,
    singletons: SingletonRegistry,
    products: FactoryProducts,
    prototypes: PrototypeTracker,
    scopes: ScopeRegistry,
    config: ContainerConfig,
}

/// Hierarchical component container.
///
/// Cloning is cheap and yields a handle to the same container.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Container {
    /// Start building a container over `store`, creating instances with `creator`
    pub fn builder<S, C>(store: S, creator: C) -> ContainerBuilder
    where
        S: DescriptorStore + 'static,
        C: ComponentCreator + 'static,
    {
        ContainerBuilder {
            store: Arc::new(store),
            creator: Arc::new(creator),
            parent: None,
            converter: None,
            scopes: Vec::new(),
            config: ContainerConfig::default(),
        }
    }

    /// Start building a child of this container
    pub fn child<S, C>(&self, store: S, creator: C) -> ContainerBuilder
    where
        S: DescriptorStore + 'static,
        C: ComponentCreator + 'static,
    {
        Self::builder(store, creator).parent(self.clone())
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    #[inline]
    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    #[inline]
    pub fn config(&self) -> ContainerConfig {
        self.inner.config
    }

    /// Descriptor store backing this container
    #[inline]
    pub fn store(&self) -> &Arc<dyn DescriptorStore> {
        &self.inner.store
    }

    // =========================================================================
    // Names
    // =========================================================================

    /// Strip dereference prefixes and follow aliases
    fn transformed_name(&self, name: &str) -> String {
        self.inner.aliases.canonical_name(strip_factory_prefix(name))
    }

    /// Canonical name, keeping a single dereference prefix if one was given
    fn original_name(&self, name: &str) -> String {
        let canonical = self.transformed_name(name);
        if is_factory_dereference(name) {
            format!("{FACTORY_PREFIX}{canonical}")
        } else {
            canonical
        }
    }

    /// Canonical form of `name` in this container
    #[inline]
    pub fn canonical_name(&self, name: &str) -> String {
        self.transformed_name(name)
    }

    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.inner.aliases.register_alias(name, alias)
    }

    pub fn remove_alias(&self, alias: &str) -> Result<()> {
        self.inner.aliases.remove_alias(alias)
    }

    #[inline]
    pub fn is_alias(&self, name: &str) -> bool {
        self.inner.aliases.is_alias(name)
    }

    /// Rewrite every registered alias through `resolver`
    pub fn resolve_aliases<F>(&self, resolver: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.inner.aliases.resolve_aliases(resolver)
    }

    /// Every other name that reaches the same component, parent aliases included
    pub fn aliases(&self, name: &str) -> Vec<String> {
        let canonical = self.transformed_name(name);
        let dereference = is_factory_dereference(name);
        let full = if dereference {
            format!("{FACTORY_PREFIX}{canonical}")
        } else {
            canonical.clone()
        };

        let mut aliases = Vec::new();
        if full != name {
            aliases.push(full.clone());
        }
        for alias in self.inner.aliases.aliases_of(&canonical) {
            let alias = if dereference {
                format!("{FACTORY_PREFIX}{alias}")
            } else {
                alias
            };
            if alias != name {
                aliases.push(alias);
            }
        }

        if !self.inner.singletons.contains(&canonical) && !self.inner.store.contains_descriptor(&canonical) {
            if let Some(parent) = &self.inner.parent {
                aliases.extend(parent.aliases(&full));
            }
        }
        aliases
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve `name` to an instance
    #[inline]
    pub fn resolve(&self, name: &str) -> Result<Instance> {
        self.do_resolve(name, None, None, false)
    }

    /// Resolve `name`, requiring the instance to be (or convert to) `required`
    #[inline]
    pub fn resolve_typed(&self, name: &str, required: ComponentType) -> Result<Instance> {
        self.do_resolve(name, Some(required), None, false)
    }

    /// Resolve `name` with explicit construction arguments
    #[inline]
    pub fn resolve_with_args(&self, name: &str, args: &[Argument]) -> Result<Instance> {
        self.do_resolve(name, None, Some(args), false)
    }

    /// Resolve with every option
    #[inline]
    pub fn resolve_with(
        &self,
        name: &str,
        required: Option<ComponentType>,
        args: Option<&[Argument]>,
    ) -> Result<Instance> {
        self.do_resolve(name, required, args, false)
    }

    /// Resolve and downcast to `T`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use component_resolver::{ComponentDescriptor, Container, DescriptorRegistry, FnCreator, Instance};
    ///
    /// let store = DescriptorRegistry::new().with("answer", ComponentDescriptor::new());
    /// let creator = FnCreator::new().with("answer", |_| Ok(Instance::new(42u32)));
    /// let container = Container::builder(store, creator).build().unwrap();
    ///
    /// assert_eq!(*container.get::<u32>("answer").unwrap(), 42);
    /// assert!(container.get::<String>("answer").is_err());
    /// ```
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let required = ComponentType::of::<T>();
        let instance = self.do_resolve(name, Some(required), None, false)?;
        instance
            .downcast::<T>()
            .ok_or_else(|| ResolveError::TypeMismatch {
                name: name.to_owned(),
                required: required.name(),
                actual: instance.type_name(),
            })
    }

    /// Resolve and downcast, returning None on any failure
    #[inline]
    pub fn try_get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.get::<T>(name).ok()
    }

    fn do_resolve(
        &self,
        name: &str,
        required: Option<ComponentType>,
        args: Option<&[Argument]>,
        type_check_only: bool,
    ) -> Result<Instance> {
        let canonical = self.transformed_name(name);

        if let Some(shared) = self.inner.singletons.get(&canonical) {
            // Arguments only apply to the first construction of a singleton
            if args.is_none() || self.inner.store.contains_descriptor(&canonical) {
                #[cfg(feature = "logging")]
                if self.inner.singletons.is_in_creation(&canonical) {
                    trace!(
                        target: "component_resolver",
                        component = %canonical,
                        depth = self.inner.depth,
                        "Returning early reference to singleton still in creation"
                    );
                } else {
                    trace!(
                        target: "component_resolver",
                        component = %canonical,
                        depth = self.inner.depth,
                        "Returning cached singleton"
                    );
                }

                let instance = self.object_for_instance(shared, name, &canonical)?;
                return self.adapt(instance, name, required);
            }
            if !self.inner.store.contains_descriptor(&canonical) {
                return Err(ResolveError::InvalidArguments {
                    name: canonical,
                    reason: "explicit arguments cannot be applied to a registered instance".to_owned(),
                });
            }
        }

        if self.inner.prototypes.is_in_creation(&canonical) {
            return Err(ResolveError::CircularPrototype { name: canonical });
        }

        if let Some(parent) = &self.inner.parent {
            if !self.inner.store.contains_descriptor(&canonical) {
                let lookup = self.original_name(name);

                #[cfg(feature = "logging")]
                trace!(
                    target: "component_resolver",
                    component = %lookup,
                    depth = self.inner.depth,
                    "No local descriptor, delegating to parent container"
                );

                return parent.do_resolve(&lookup, required, args, type_check_only);
            }
        }

        let marked = !type_check_only && self.inner.merger.mark_as_created(&canonical);

        let result = self.create_and_adapt(name, &canonical, required, args);
        if result.is_err() && marked {
            self.inner.merger.cleanup_after_failure(&canonical);
        }
        result
    }

    fn create_and_adapt(
        &self,
        name: &str,
        canonical: &str,
        required: Option<ComponentType>,
        args: Option<&[Argument]>,
    ) -> Result<Instance> {
        let merged = self.merged_local(canonical)?;
        self.check_descriptor(&merged, canonical)?;

        for dependency in merged.depends_on() {
            let dependency_name = self.transformed_name(dependency);
            if self.inner.singletons.graph().is_dependent(canonical, &dependency_name) {
                return Err(ResolveError::CircularDependsOn {
                    name: canonical.to_owned(),
                    dependency: dependency.clone(),
                });
            }
            self.inner.singletons.graph().register(&dependency_name, canonical);
            self.do_resolve(dependency, None, None, false)?;
        }

        let instance = match merged.scope() {
            ScopeKind::Singleton => {
                let shared = self.inner.singletons.get_or_create(canonical, || {
                    self.create_component(canonical, &merged, args)
                })?;
                self.object_for_instance(shared, name, canonical)?
            }
            ScopeKind::Prototype => {
                let created = {
                    let _marker = self.inner.prototypes.enter(canonical);
                    self.create_component(canonical, &merged, args)?
                };
                self.object_for_instance(created, name, canonical)?
            }
            ScopeKind::Custom(scope_name) => {
                let strategy = self.inner.scopes.get(scope_name).ok_or_else(|| {
                    ResolveError::UnknownScope {
                        scope: scope_name.clone(),
                        name: canonical.to_owned(),
                    }
                })?;

                let create = || {
                    let _marker = self.inner.prototypes.enter(canonical);
                    self.create_component(canonical, &merged, args)
                };
                let scoped = strategy.get(canonical, &create).map_err(|e| match e {
                    ScopeError::Inactive(reason) => ResolveError::InactiveScope {
                        scope: scope_name.clone(),
                        name: canonical.to_owned(),
                        reason,
                    },
                    ScopeError::Creation(err) => err,
                })?;
                self.object_for_instance(scoped, name, canonical)?
            }
        };

        self.adapt(instance, name, required)
    }

    /// Run the creation capability and register destruction if needed
    fn create_component(
        &self,
        name: &str,
        merged: &Arc<MergedDescriptor>,
        args: Option<&[Argument]>,
    ) -> Result<Instance> {
        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            component = name,
            scope = %merged.scope(),
            depth = self.inner.depth,
            "Creating component instance"
        );

        let request = CreationRequest {
            container: self,
            name,
            descriptor: merged,
            args,
        };
        let instance = self.inner.creator.create(&request)?;
        self.register_disposable_if_necessary(name, &instance, merged)?;
        Ok(instance)
    }

    /// Unwrap an indirect factory unless the dereference form was used
    fn object_for_instance(&self, instance: Instance, name: &str, canonical: &str) -> Result<Instance> {
        if is_factory_dereference(name) {
            if !instance.is_factory() {
                return Err(ResolveError::NotAFactory {
                    name: canonical.to_owned(),
                    actual: instance.type_name(),
                });
            }
            return Ok(instance);
        }

        let Some(factory) = instance.as_factory() else {
            return Ok(instance);
        };
        let cache = self.inner.singletons.contains(canonical);
        self.inner.products.get_object(factory, canonical, cache)
    }

    /// Coerce to the required type through the converter, if any
    fn adapt(&self, instance: Instance, name: &str, required: Option<ComponentType>) -> Result<Instance> {
        let Some(required) = required else {
            return Ok(instance);
        };
        if instance.component_type() == required {
            return Ok(instance);
        }

        if let Some(converter) = &self.inner.converter {
            if let Some(converted) = converter.convert(&instance, required) {
                if converted.component_type() == required {
                    return Ok(converted);
                }
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            component = name,
            required = required.name(),
            actual = instance.type_name(),
            "Failed to convert component to required type"
        );

        Err(ResolveError::TypeMismatch {
            name: name.to_owned(),
            required: required.name(),
            actual: instance.type_name(),
        })
    }

    // =========================================================================
    // Descriptors
    // =========================================================================

    /// Merged descriptor for `name`, delegating to the parent when there is no local one
    pub fn merged_descriptor(&self, name: &str) -> Result<Arc<MergedDescriptor>> {
        let canonical = self.transformed_name(name);
        if !self.inner.store.contains_descriptor(&canonical) {
            if let Some(parent) = &self.inner.parent {
                return parent.merged_descriptor(&canonical);
            }
        }
        self.merged_local(&canonical)
    }

    fn merged_local(&self, canonical: &str) -> Result<Arc<MergedDescriptor>> {
        if let Some(merged) = self.inner.merger.cached(canonical) {
            return Ok(merged);
        }
        let descriptor = self.inner.store.descriptor(canonical)?;
        self.merge_descriptor(canonical, &descriptor, None)
    }

    fn merge_descriptor(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
        containing: Option<&MergedDescriptor>,
    ) -> Result<Arc<MergedDescriptor>> {
        self.inner.merger.merge(name, descriptor, containing, |parent_name| {
            let parent_canonical = self.transformed_name(parent_name);
            if parent_canonical != name {
                return self.merged_descriptor(&parent_canonical);
            }
            match &self.inner.parent {
                Some(parent) => parent.merged_descriptor(&parent_canonical),
                None => Err(ResolveError::UnresolvableParent {
                    name: name.to_owned(),
                    parent: parent_name.to_owned(),
                    reason: "parent name equals the component name and there is no parent container"
                        .to_owned(),
                }),
            }
        })
    }

    /// Merge a descriptor nested inside `containing`; never cached
    pub fn merge_inner(
        &self,
        name: &str,
        descriptor: &ComponentDescriptor,
        containing: &MergedDescriptor,
    ) -> Result<Arc<MergedDescriptor>> {
        self.merge_descriptor(name, descriptor, Some(containing))
    }

    /// `Abstract` when the descriptor cannot be instantiated
    pub fn check_descriptor(&self, merged: &MergedDescriptor, name: &str) -> Result<()> {
        if merged.is_abstract() {
            return Err(ResolveError::Abstract {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Drop the cached merge for `name`
    pub fn invalidate_descriptor(&self, name: &str) {
        self.inner.merger.invalidate(&self.transformed_name(name));
    }

    /// Drop cached merges of every component not yet marked as created
    pub fn clear_metadata_cache(&self) {
        self.inner.merger.clear_ineligible();
    }

    /// Whether any component has been marked as created
    #[inline]
    pub fn has_creation_started(&self) -> bool {
        self.inner.merger.has_creation_started()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether `name` resolves in this container or an ancestor
    pub fn contains(&self, name: &str) -> bool {
        let canonical = self.transformed_name(name);
        if self.inner.singletons.contains(&canonical) || self.inner.store.contains_descriptor(&canonical) {
            return !is_factory_dereference(name) || self.is_factory(name).unwrap_or(false);
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(|parent| parent.contains(&self.original_name(name)))
    }

    /// Whether `name` resolves in this container alone
    pub fn contains_local(&self, name: &str) -> bool {
        let canonical = self.transformed_name(name);
        (self.inner.singletons.contains(&canonical) || self.inner.store.contains_descriptor(&canonical))
            && (!is_factory_dereference(name) || self.is_factory(name).unwrap_or(false))
    }

    /// Whether `name` is an indirect factory
    pub fn is_factory(&self, name: &str) -> Result<bool> {
        let canonical = self.transformed_name(name);
        if let Some(instance) = self.inner.singletons.peek(&canonical) {
            return Ok(instance.is_factory());
        }
        if !self.inner.store.contains_descriptor(&canonical) {
            if let Some(parent) = &self.inner.parent {
                return parent.is_factory(name);
            }
        }
        Ok(self.merged_local(&canonical)?.is_indirect_factory())
    }

    /// Whether resolving `name` always yields the same instance
    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        let canonical = self.transformed_name(name);
        let dereference = is_factory_dereference(name);

        if let Some(instance) = self.inner.singletons.peek(&canonical) {
            return Ok(match instance.as_factory() {
                Some(factory) => dereference || factory.is_singleton(),
                None => !dereference,
            });
        }

        if !self.inner.store.contains_descriptor(&canonical) {
            if let Some(parent) = &self.inner.parent {
                return parent.is_singleton(&self.original_name(name));
            }
        }

        let merged = self.merged_local(&canonical)?;
        if !merged.is_singleton() {
            return Ok(false);
        }
        if merged.is_indirect_factory() {
            if dereference {
                return Ok(true);
            }
            let factory = self.resolve(&format!("{FACTORY_PREFIX}{canonical}"))?;
            return Ok(factory.as_factory().is_some_and(|f| f.is_singleton()));
        }
        Ok(!dereference)
    }

    /// Whether resolving `name` yields a fresh instance every time
    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        let canonical = self.transformed_name(name);
        let dereference = is_factory_dereference(name);
        let local = self.inner.store.contains_descriptor(&canonical);

        if !local {
            if let Some(instance) = self.inner.singletons.peek(&canonical) {
                return Ok(match instance.as_factory() {
                    Some(factory) => !dereference && (factory.is_prototype() || !factory.is_singleton()),
                    None => false,
                });
            }
            if let Some(parent) = &self.inner.parent {
                return parent.is_prototype(&self.original_name(name));
            }
        }

        let merged = self.merged_local(&canonical)?;
        if merged.is_prototype() {
            return Ok(!dereference || merged.is_indirect_factory());
        }
        if dereference || !merged.is_indirect_factory() {
            return Ok(false);
        }
        let factory = self.resolve(&format!("{FACTORY_PREFIX}{canonical}"))?;
        Ok(factory
            .as_factory()
            .is_some_and(|f| f.is_prototype() || !f.is_singleton()))
    }

    /// Whether resolving `name` would yield an instance of `ty`
    pub fn is_type_match(&self, name: &str, ty: ComponentType) -> Result<bool> {
        let canonical = self.transformed_name(name);
        let dereference = is_factory_dereference(name);

        if let Some(instance) = self.inner.singletons.peek(&canonical) {
            return Ok(match instance.as_factory() {
                Some(factory) if !dereference => factory.object_type() == Some(ty),
                Some(_) => instance.component_type() == ty,
                None => !dereference && instance.component_type() == ty,
            });
        }

        if !self.inner.store.contains_descriptor(&canonical) {
            if let Some(parent) = &self.inner.parent {
                return parent.is_type_match(&self.original_name(name), ty);
            }
        }

        let merged = self.merged_local(&canonical)?;
        if !dereference {
            if let Some(target) = self.decorated_type(&merged)? {
                return Ok(target == ty);
            }
        }

        if merged.is_indirect_factory() {
            if dereference {
                return Ok(self.inner.creator.predict_type(&canonical, &merged) == Some(ty));
            }
            return Ok(self.type_for_factory(&canonical, &merged) == Some(ty));
        }
        if dereference {
            return Ok(false);
        }
        Ok(self.inner.creator.predict_type(&canonical, &merged) == Some(ty))
    }

    /// Type resolving `name` would yield, if it can be determined without full creation
    pub fn type_of(&self, name: &str) -> Result<Option<ComponentType>> {
        let canonical = self.transformed_name(name);
        let dereference = is_factory_dereference(name);

        if let Some(instance) = self.inner.singletons.peek(&canonical) {
            return Ok(match instance.as_factory() {
                Some(factory) if !dereference => factory.object_type(),
                _ => Some(instance.component_type()),
            });
        }

        if !self.inner.store.contains_descriptor(&canonical) {
            if let Some(parent) = &self.inner.parent {
                return parent.type_of(&self.original_name(name));
            }
        }

        let merged = self.merged_local(&canonical)?;
        if !dereference {
            if let Some(target) = self.decorated_type(&merged)? {
                return Ok(Some(target));
            }
        }

        if merged.is_indirect_factory() {
            if dereference {
                return Ok(self.inner.creator.predict_type(&canonical, &merged));
            }
            return Ok(self.type_for_factory(&canonical, &merged));
        }
        if dereference {
            return Ok(None);
        }
        Ok(self.inner.creator.predict_type(&canonical, &merged))
    }

    /// Predicted type of a decorated target that is not itself a factory
    fn decorated_type(&self, merged: &MergedDescriptor) -> Result<Option<ComponentType>> {
        let Some(decorated) = merged.decorated() else {
            return Ok(None);
        };
        let target = self.merge_descriptor(&decorated.name, &decorated.descriptor, Some(merged))?;
        if target.is_indirect_factory() {
            return Ok(None);
        }
        Ok(self.inner.creator.predict_type(&decorated.name, &target))
    }

    /// Product type of an indirect factory.
    ///
    /// Asks the creator first, then falls back to creating the factory for a
    /// type check. Failures of that fallback are logged and yield None.
    fn type_for_factory(&self, canonical: &str, merged: &MergedDescriptor) -> Option<ComponentType> {
        if let Some(ty) = self.inner.creator.predict_product_type(canonical, merged) {
            return Some(ty);
        }
        if !merged.is_singleton() {
            return None;
        }

        match self.do_resolve(&format!("{FACTORY_PREFIX}{canonical}"), None, None, true) {
            Ok(factory) => factory.as_factory().and_then(|f| f.object_type()),
            Err(_e) => {
                #[cfg(feature = "logging")]
                if _e.is_currently_in_creation() {
                    debug!(
                        target: "component_resolver",
                        component = canonical,
                        error = %_e,
                        "Component currently in creation on factory type check"
                    );
                } else if merged.is_lazy() {
                    debug!(
                        target: "component_resolver",
                        component = canonical,
                        error = %_e,
                        "Creation failed on lazy factory type check"
                    );
                } else {
                    warn!(
                        target: "component_resolver",
                        component = canonical,
                        error = %_e,
                        "Creation failed on non-lazy factory type check"
                    );
                }
                None
            }
        }
    }

    /// Whether `name` is being created, as a singleton or on this thread as a prototype
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        let canonical = self.transformed_name(name);
        self.inner.singletons.is_in_creation(&canonical) || self.inner.prototypes.is_in_creation(&canonical)
    }

    // =========================================================================
    // Singletons
    // =========================================================================

    /// Register a fully built instance under `name`
    pub fn register_singleton(&self, name: &str, instance: Instance) -> Result<()> {
        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            component = name,
            instance = instance.type_name(),
            depth = self.inner.depth,
            "Registering singleton instance"
        );

        self.inner.singletons.register(name, instance)
    }

    /// Expose a partially-initialized singleton to circular references.
    ///
    /// Only effective on the thread currently creating `name`.
    pub fn register_early_singleton(&self, name: &str, instance: Instance) -> bool {
        self.inner.singletons.expose_early(&self.transformed_name(name), instance)
    }

    /// Whether a finished singleton is cached under `name` in this container
    #[inline]
    pub fn contains_singleton(&self, name: &str) -> bool {
        self.inner.singletons.contains(name)
    }

    pub fn singleton_names(&self) -> Vec<String> {
        self.inner.singletons.names()
    }

    #[inline]
    pub fn singleton_count(&self) -> usize {
        self.inner.singletons.count()
    }

    /// Discard a singleton created only to answer a type query
    pub fn remove_singleton_if_created_for_type_check(&self, name: &str) -> bool {
        let canonical = self.transformed_name(name);
        if self.inner.merger.is_created(&canonical) {
            return false;
        }
        self.inner.singletons.remove(&canonical);
        self.inner.products.remove(&canonical);
        true
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    /// Record that `dependent` needs `dependency`
    pub fn register_dependent(&self, dependency: &str, dependent: &str) {
        self.inner
            .singletons
            .graph()
            .register(&self.transformed_name(dependency), &self.transformed_name(dependent));
    }

    /// Whether `dependent` needs `name`, directly or transitively
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        self.inner
            .singletons
            .graph()
            .is_dependent(&self.transformed_name(name), &self.transformed_name(dependent))
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.inner.singletons.graph().dependents_of(&self.transformed_name(name))
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.inner.singletons.graph().dependencies_of(&self.transformed_name(name))
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    /// Register a custom scope; `singleton` and `prototype` are reserved
    pub fn register_scope(&self, name: &str, strategy: Arc<dyn ScopeStrategy>) -> Result<()> {
        self.inner.scopes.register(name, strategy)
    }

    pub fn registered_scope(&self, name: &str) -> Option<Arc<dyn ScopeStrategy>> {
        self.inner.scopes.get(name)
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.inner.scopes.names()
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Register a callback to run when singleton `name` is destroyed
    pub fn register_disposable(&self, name: &str, callback: DestructionCallback) {
        self.inner.singletons.register_disposable(name, callback);
    }

    /// Hook `instance` up for destruction when the creator asks for it.
    ///
    /// Singletons are destroyed with the container, custom-scoped components
    /// with their scope context. Prototypes are never tracked.
    pub fn register_disposable_if_necessary(
        &self,
        name: &str,
        instance: &Instance,
        merged: &MergedDescriptor,
    ) -> Result<()> {
        if merged.is_prototype() || !self.inner.creator.requires_destruction(name, instance, merged) {
            return Ok(());
        }

        let callback: DestructionCallback = {
            let creator = Arc::clone(&self.inner.creator);
            let name = name.to_owned();
            let instance = instance.clone();
            Box::new(move || creator.destroy(&name, &instance))
        };

        match merged.scope() {
            ScopeKind::Custom(scope_name) => {
                let strategy = self.inner.scopes.get(scope_name).ok_or_else(|| {
                    ResolveError::UnknownScope {
                        scope: scope_name.clone(),
                        name: name.to_owned(),
                    }
                })?;
                strategy.register_destruction_callback(name, callback);
            }
            _ => self.inner.singletons.register_disposable(name, callback),
        }
        Ok(())
    }

    /// Destroy singleton `name` and every singleton depending on it
    pub fn destroy_singleton(&self, name: &str) {
        let canonical = self.transformed_name(name);
        self.inner.singletons.destroy_singleton(&canonical);

        let singletons = &self.inner.singletons;
        self.inner.products.retain(|factory| singletons.contains(factory));
    }

    /// Destroy every singleton of this container
    pub fn destroy_singletons(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            depth = self.inner.depth,
            singletons = self.inner.singletons.count(),
            "Destroying singletons of container"
        );

        self.inner.singletons.destroy_singletons();
        self.inner.products.clear();
    }

    /// Remove a custom-scoped instance from its current context and destroy it
    pub fn destroy_scoped(&self, name: &str) -> Result<()> {
        let canonical = self.transformed_name(name);
        let merged = self.merged_local(&canonical)?;

        let ScopeKind::Custom(scope_name) = merged.scope() else {
            return Err(ResolveError::NotMutableScope { name: canonical });
        };
        let strategy = self.inner.scopes.get(scope_name).ok_or_else(|| ResolveError::UnknownScope {
            scope: scope_name.clone(),
            name: canonical.clone(),
        })?;

        if let Some(instance) = strategy.remove(&canonical) {
            #[cfg(feature = "logging")]
            debug!(
                target: "component_resolver",
                component = %canonical,
                scope = %scope_name,
                "Destroying scoped instance"
            );
            self.inner.creator.destroy(&canonical, &instance);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("depth", &self.inner.depth)
            .field("singletons", &self.inner.singletons.count())
            .field("aliases", &self.inner.aliases.len())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}
