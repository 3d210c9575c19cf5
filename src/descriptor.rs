//! Component descriptors and their merged (flattened) form
//!
//! A [`ComponentDescriptor`] is the declarative recipe handed out by a
//! [`DescriptorStore`](crate::DescriptorStore). Every optional field that is
//! `None` counts as "not explicitly set", which is what lets a child descriptor
//! override only part of its parent. The merge result is a [`MergedDescriptor`],
//! immutable and shared behind an `Arc`.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime identity of a component type.
///
/// Assignability between component types is type identity: two types match
/// when their `TypeId`s are equal.
#[derive(Clone, Copy)]
pub struct ComponentType {
    id: TypeId,
    name: &'static str,
}

impl ComponentType {
    /// Type identity of `T`
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check whether this type is `T`
    #[inline]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentType {}

impl Hash for ComponentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Lifecycle policy of a component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ScopeKind {
    /// One shared instance per container
    #[default]
    Singleton,
    /// A fresh instance for every resolution
    Prototype,
    /// Delegated to a registered [`ScopeStrategy`](crate::ScopeStrategy)
    Custom(String),
}

impl ScopeKind {
    pub const SINGLETON: &'static str = "singleton";
    pub const PROTOTYPE: &'static str = "prototype";

    /// Parse a scope name; anything but the two built-ins is a custom scope
    pub fn parse(name: &str) -> Self {
        match name {
            Self::SINGLETON => Self::Singleton,
            Self::PROTOTYPE => Self::Prototype,
            other => Self::Custom(other.to_owned()),
        }
    }

    /// Custom scope with the given name
    pub fn custom(name: impl Into<String>) -> Self {
        Self::parse(&name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Singleton => Self::SINGLETON,
            Self::Prototype => Self::PROTOTYPE,
            Self::Custom(name) => name,
        }
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Singleton)
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, Self::Prototype)
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A descriptor wrapped by another one, e.g. the target of a proxy definition
#[derive(Debug, Clone)]
pub struct DecoratedDescriptor {
    pub name: String,
    pub descriptor: ComponentDescriptor,
}

/// Declarative recipe for producing a component.
///
/// # Examples
///
/// ```rust
/// use component_resolver::{ComponentDescriptor, ScopeKind};
///
/// let base = ComponentDescriptor::new()
///     .as_abstract()
///     .property("pool_size", "8")
///     .property("timeout", "30");
///
/// let child = ComponentDescriptor::new()
///     .with_parent("base")
///     .with_scope(ScopeKind::Prototype)
///     .property("timeout", "5");
///
/// assert!(base.is_abstract);
/// assert_eq!(child.parent.as_deref(), Some("base"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ComponentDescriptor {
    pub scope: Option<ScopeKind>,
    pub parent: Option<String>,
    pub component_type: Option<ComponentType>,
    pub type_name: Option<String>,
    pub factory_method: Option<String>,
    pub is_abstract: bool,
    pub lazy: Option<bool>,
    pub depends_on: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub indirect_factory: Option<bool>,
    pub decorated: Option<Box<DecoratedDescriptor>>,
    pub description: Option<String>,
}

impl ComponentDescriptor {
    /// Empty descriptor; every attribute unset
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn singleton(self) -> Self {
        self.with_scope(ScopeKind::Singleton)
    }

    pub fn prototype(self) -> Self {
        self.with_scope(ScopeKind::Prototype)
    }

    pub fn scoped(self, scope: impl Into<String>) -> Self {
        self.with_scope(ScopeKind::custom(scope))
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Declare the type of the produced instance (the factory type for indirect factories)
    pub fn with_type<T: ?Sized + 'static>(mut self) -> Self {
        self.component_type = Some(ComponentType::of::<T>());
        self.type_name.get_or_insert_with(|| std::any::type_name::<T>().to_owned());
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_factory_method(mut self, method: impl Into<String>) -> Self {
        self.factory_method = Some(method.into());
        self
    }

    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = Some(lazy);
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Mark the produced instance as an indirect factory
    pub fn indirect_factory(mut self) -> Self {
        self.indirect_factory = Some(true);
        self
    }

    pub fn decorating(mut self, name: impl Into<String>, descriptor: ComponentDescriptor) -> Self {
        self.decorated = Some(Box::new(DecoratedDescriptor {
            name: name.into(),
            descriptor,
        }));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Overlay every explicitly-set attribute of `other` onto `self`.
    ///
    /// The abstract flag always comes from `other`; properties merge key by key.
    pub fn override_from(&mut self, other: &ComponentDescriptor) {
        if other.scope.is_some() {
            self.scope.clone_from(&other.scope);
        }
        if other.component_type.is_some() {
            self.component_type = other.component_type;
        }
        if other.type_name.is_some() {
            self.type_name.clone_from(&other.type_name);
        }
        if other.factory_method.is_some() {
            self.factory_method.clone_from(&other.factory_method);
        }
        self.is_abstract = other.is_abstract;
        if other.lazy.is_some() {
            self.lazy = other.lazy;
        }
        if !other.depends_on.is_empty() {
            self.depends_on.clone_from(&other.depends_on);
        }
        for (key, value) in &other.properties {
            self.properties.insert(key.clone(), value.clone());
        }
        if other.indirect_factory.is_some() {
            self.indirect_factory = other.indirect_factory;
        }
        if other.decorated.is_some() {
            self.decorated.clone_from(&other.decorated);
        }
        if other.description.is_some() {
            self.description.clone_from(&other.description);
        }
    }
}

/// A fully flattened descriptor: parent attributes folded in, scope always set
#[derive(Debug, Clone)]
pub struct MergedDescriptor {
    scope: ScopeKind,
    component_type: Option<ComponentType>,
    type_name: Option<String>,
    factory_method: Option<String>,
    is_abstract: bool,
    lazy: bool,
    depends_on: Vec<String>,
    properties: BTreeMap<String, String>,
    indirect_factory: bool,
    decorated: Option<Box<DecoratedDescriptor>>,
    description: Option<String>,
}

impl MergedDescriptor {
    /// Finalize a flattened descriptor.
    ///
    /// An unset scope defaults to singleton; a singleton nested in a
    /// non-singleton owner takes the owner's scope.
    pub(crate) fn flatten(flat: ComponentDescriptor, containing: Option<&MergedDescriptor>) -> Self {
        let mut scope = flat.scope.unwrap_or_default();
        if let Some(owner) = containing {
            if !owner.scope.is_singleton() && scope.is_singleton() {
                scope = owner.scope.clone();
            }
        }

        Self {
            scope,
            component_type: flat.component_type,
            type_name: flat.type_name,
            factory_method: flat.factory_method,
            is_abstract: flat.is_abstract,
            lazy: flat.lazy.unwrap_or(false),
            depends_on: flat.depends_on,
            properties: flat.properties,
            indirect_factory: flat.indirect_factory.unwrap_or(false),
            decorated: flat.decorated,
            description: flat.description,
        }
    }

    /// Deep copy back into descriptor form, every attribute explicitly set
    pub fn to_descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor {
            scope: Some(self.scope.clone()),
            parent: None,
            component_type: self.component_type,
            type_name: self.type_name.clone(),
            factory_method: self.factory_method.clone(),
            is_abstract: self.is_abstract,
            lazy: Some(self.lazy),
            depends_on: self.depends_on.clone(),
            properties: self.properties.clone(),
            indirect_factory: Some(self.indirect_factory),
            decorated: self.decorated.clone(),
            description: self.description.clone(),
        }
    }

    #[inline]
    pub fn scope(&self) -> &ScopeKind {
        &self.scope
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.scope.is_singleton()
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        self.scope.is_prototype()
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    #[inline]
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    #[inline]
    pub fn is_indirect_factory(&self) -> bool {
        self.indirect_factory
    }

    pub fn component_type(&self) -> Option<ComponentType> {
        self.component_type
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    pub fn factory_method(&self) -> Option<&str> {
        self.factory_method.as_deref()
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn decorated(&self) -> Option<&DecoratedDescriptor> {
        self.decorated.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}
