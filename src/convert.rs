//! Type conversion for resolved instances
//!
//! When a caller asks for a type the resolved instance does not have, the
//! container offers the instance to its [`TypeConverter`] before giving up
//! with a type mismatch.

use crate::descriptor::ComponentType;
use crate::instance::Instance;
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Converts an instance into another component type
pub trait TypeConverter: Send + Sync {
    /// Converted instance, or `None` when no conversion applies
    fn convert(&self, instance: &Instance, target: ComponentType) -> Option<Instance>;
}

type ConvertFn = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

/// Converter registry keyed by (source, target) type pair
///
/// # Examples
///
/// ```rust
/// use component_resolver::{ComponentType, ConversionService, Instance, TypeConverter};
///
/// let service = ConversionService::new().with::<u32, String, _>(|n| n.to_string());
///
/// let converted = service
///     .convert(&Instance::new(7u32), ComponentType::of::<String>())
///     .unwrap();
/// assert_eq!(converted.downcast_ref::<String>().map(String::as_str), Some("7"));
/// ```
pub struct ConversionService {
    converters: DashMap<(TypeId, TypeId), ConvertFn, RandomState>,
}

impl ConversionService {
    pub fn new() -> Self {
        Self {
            converters: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Register a conversion from `S` to `T`
    pub fn add<S, T, F>(&self, convert: F)
    where
        S: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        self.converters.insert(
            (TypeId::of::<S>(), TypeId::of::<T>()),
            Arc::new(move |instance: &Instance| {
                instance.downcast_ref::<S>().map(|source| Instance::new(convert(source)))
            }),
        );
    }

    /// Builder-style [`add`](Self::add)
    pub fn with<S, T, F>(self, convert: F) -> Self
    where
        S: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        self.add::<S, T, F>(convert);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl Default for ConversionService {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeConverter for ConversionService {
    fn convert(&self, instance: &Instance, target: ComponentType) -> Option<Instance> {
        let key = (instance.component_type().id(), target.id());
        let convert = self.converters.get(&key).map(|c| Arc::clone(c.value()))?;

        #[cfg(feature = "logging")]
        trace!(
            target: "component_resolver",
            from = instance.type_name(),
            to = target.name(),
            "Converting instance"
        );

        convert(instance)
    }
}

impl std::fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionService")
            .field("converters", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_conversion() {
        let service = ConversionService::new();
        service.add::<u8, u64, _>(|n| u64::from(*n) * 2);

        let out = service
            .convert(&Instance::new(21u8), ComponentType::of::<u64>())
            .unwrap();
        assert_eq!(out.downcast_ref::<u64>(), Some(&42));
    }

    #[test]
    fn test_missing_conversion() {
        let service = ConversionService::new();
        assert!(service.is_empty());
        assert!(
            service
                .convert(&Instance::new(1u8), ComponentType::of::<String>())
                .is_none()
        );
    }
}
