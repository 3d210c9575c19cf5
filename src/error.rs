//! Error types for component resolution

use std::sync::Arc;
use thiserror::Error;

/// Boxed error produced by collaborators (creators, factories, converters)
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared form of a collaborator error, so failures can be cloned to every waiter
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while resolving, registering or destroying components
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// No descriptor for the name anywhere in the hierarchy
    #[error("No component named '{name}' is defined")]
    NotFound { name: String },

    /// The merged descriptor is abstract and only usable as a parent
    #[error("Component '{name}' is abstract and cannot be instantiated")]
    Abstract { name: String },

    /// A prototype requested itself during its own construction
    #[error(
        "Prototype component '{name}' is currently in creation on this thread: \
         is there an unresolvable circular reference?"
    )]
    CircularPrototype { name: String },

    /// A singleton requested itself before exposing an early reference
    #[error(
        "Component '{name}' is currently in creation: \
         is there an unresolvable circular reference?"
    )]
    CurrentlyInCreation { name: String },

    /// The declared `depends_on` graph contains a cycle
    #[error("Circular depends-on relationship between '{name}' and '{dependency}'")]
    CircularDependsOn { name: String, dependency: String },

    /// A child descriptor names a parent that cannot be found
    #[error("Could not resolve parent descriptor '{parent}' of component '{name}': {reason}")]
    UnresolvableParent {
        name: String,
        parent: String,
        reason: String,
    },

    /// The merged descriptor names a scope that was never registered
    #[error("No scope registered for scope name '{scope}' (component '{name}')")]
    UnknownScope { scope: String, name: String },

    /// The scope exists but has no active context on the calling thread
    #[error(
        "Scope '{scope}' is not active for the current thread; consider defining a \
         scoped proxy for component '{name}' if you intend to refer to it from a \
         singleton: {reason}"
    )]
    InactiveScope {
        scope: String,
        name: String,
        reason: String,
    },

    /// Attempt to replace one of the built-in scopes
    #[error("Cannot replace built-in scope '{scope}'")]
    ReservedScope { scope: String },

    /// `destroy_scoped` on a singleton or prototype component
    #[error("Component '{name}' does not correspond to an object in a mutable scope")]
    NotMutableScope { name: String },

    /// Resolved instance is not of the requested type and could not be converted
    #[error("Component '{name}' is expected to be of type '{required}' but was actually of type '{actual}'")]
    TypeMismatch {
        name: String,
        required: &'static str,
        actual: &'static str,
    },

    /// An indirect factory failed to produce its object
    #[error("Factory component '{name}' failed to produce its object: {source}")]
    FactoryProduct {
        name: String,
        #[source]
        source: SharedError,
    },

    /// Dereference form used on a component that is not an indirect factory
    #[error("Component '{name}' is not a factory component (actual type '{actual}')")]
    NotAFactory { name: String, actual: &'static str },

    /// The creation capability failed
    #[error("Failed to create component '{name}': {source}")]
    CreationFailed {
        name: String,
        #[source]
        source: SharedError,
    },

    /// Registering the alias would make the alias chain cyclic
    #[error(
        "Cannot register alias '{alias}' for name '{name}': circular reference - \
         '{name}' is a direct or indirect alias for '{alias}' already"
    )]
    CircularAlias { alias: String, name: String },

    /// Alias already bound to another name and overriding is disabled
    #[error(
        "Cannot register alias '{alias}' for name '{name}': \
         it is already registered for name '{existing}'"
    )]
    AliasConflict {
        alias: String,
        name: String,
        existing: String,
    },

    /// Removing an alias that was never registered
    #[error("No alias '{alias}' registered")]
    UnknownAlias { alias: String },

    /// Manual singleton registration for a name that is already bound
    #[error("Could not register instance under name '{name}': there is already an instance bound")]
    SingletonExists { name: String },

    /// Explicit construction arguments that cannot be honoured
    #[error("Invalid explicit arguments for component '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// Singleton creation attempted while the container is shutting down
    #[error("Singleton creation of '{name}' not allowed while singletons of this container are in destruction")]
    InDestruction { name: String },
}

impl ResolveError {
    /// Create a NotFound error
    #[inline]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Wrap a collaborator failure into CreationFailed
    #[inline]
    pub fn creation_failed(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::CreationFailed {
            name: name.into(),
            source: Arc::from(source.into()),
        }
    }

    /// Wrap an indirect factory failure into FactoryProduct
    #[inline]
    pub fn factory_product(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::FactoryProduct {
            name: name.into(),
            source: Arc::from(source.into()),
        }
    }

    /// Whether this error reports a name missing from the hierarchy
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error reports a creation-time circular reference
    #[inline]
    pub fn is_currently_in_creation(&self) -> bool {
        matches!(
            self,
            Self::CurrentlyInCreation { .. } | Self::CircularPrototype { .. }
        )
    }
}

/// Failure reported by a [`ScopeStrategy`](crate::ScopeStrategy)
#[derive(Error, Debug, Clone)]
pub enum ScopeError {
    /// No context of this scope is bound to the calling thread
    #[error("{0}")]
    Inactive(String),

    /// The creation callback failed
    #[error(transparent)]
    Creation(#[from] ResolveError),
}

/// Result type alias for resolution operations
pub type Result<T> = std::result::Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_scope_suggests_proxy() {
        let err = ResolveError::InactiveScope {
            scope: "request".into(),
            name: "session".into(),
            reason: "no call context".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("scoped proxy"));
        assert!(msg.contains("'request'"));
    }

    #[test]
    fn test_creation_failed_keeps_source() {
        let err = ResolveError::creation_failed("db", "connection refused");
        let cloned = err.clone();

        assert!(cloned.to_string().contains("connection refused"));
        assert!(std::error::Error::source(&cloned).is_some());
    }

    #[test]
    fn test_type_mismatch_names_both_types() {
        let err = ResolveError::TypeMismatch {
            name: "x".into(),
            required: "u32",
            actual: "alloc::string::String",
        };
        let msg = err.to_string();
        assert!(msg.contains("u32"));
        assert!(msg.contains("String"));
    }

    #[test]
    fn test_scope_error_from_resolve_error() {
        let err: ScopeError = ResolveError::not_found("a").into();
        assert!(matches!(err, ScopeError::Creation(ResolveError::NotFound { .. })));
    }
}
