//! Type-erased component instances

use crate::descriptor::ComponentType;
use crate::factory::FactoryComponent;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A live component: a shared, type-erased value plus its runtime type.
///
/// Cloning is cheap and yields a handle to the same value. When the value is an
/// indirect factory, the instance also carries a [`FactoryComponent`] view of it.
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    ty: ComponentType,
    factory: Option<Arc<dyn FactoryComponent>>,
}

impl Instance {
    /// Wrap a plain value
    #[inline]
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared value
    #[inline]
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value: value as Arc<dyn Any + Send + Sync>,
            ty: ComponentType::of::<T>(),
            factory: None,
        }
    }

    /// Wrap an indirect factory
    #[inline]
    pub fn factory<F: FactoryComponent>(factory: F) -> Self {
        Self::factory_arc(Arc::new(factory))
    }

    /// Wrap a shared indirect factory
    #[inline]
    pub fn factory_arc<F: FactoryComponent>(factory: Arc<F>) -> Self {
        Self {
            value: Arc::clone(&factory) as Arc<dyn Any + Send + Sync>,
            ty: ComponentType::of::<F>(),
            factory: Some(factory as Arc<dyn FactoryComponent>),
        }
    }

    /// Shared handle to the value as `T`
    #[inline]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Borrow the value as `T`
    #[inline]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether the value is a `T`
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Identity comparison: both handles point at the same value
    #[inline]
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.value), Arc::as_ptr(&other.value))
    }

    /// Indirect factory view, if the value is one
    #[inline]
    pub fn as_factory(&self) -> Option<&Arc<dyn FactoryComponent>> {
        self.factory.as_ref()
    }

    #[inline]
    pub fn is_factory(&self) -> bool {
        self.factory.is_some()
    }

    #[inline]
    pub fn component_type(&self) -> ComponentType {
        self.ty
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.ty.name()
    }

    /// Raw type-erased value
    #[inline]
    pub fn as_any(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.value
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.ty)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    struct Widget(u32);

    struct WidgetFactory;

    impl FactoryComponent for WidgetFactory {
        fn get_object(&self) -> Result<Instance, BoxError> {
            Ok(Instance::new(Widget(7)))
        }

        fn object_type(&self) -> Option<ComponentType> {
            Some(ComponentType::of::<Widget>())
        }
    }

    #[test]
    fn test_downcast() {
        let instance = Instance::new(Widget(3));
        assert_eq!(instance.downcast::<Widget>().unwrap().0, 3);
        assert_eq!(instance.downcast_ref::<Widget>().unwrap().0, 3);
        assert!(instance.downcast::<String>().is_none());
        assert!(instance.component_type().is::<Widget>());
    }

    #[test]
    fn test_ptr_eq() {
        let a = Instance::new(Widget(1));
        let b = a.clone();
        let c = Instance::new(Widget(1));
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_factory_view() {
        let instance = Instance::factory(WidgetFactory);
        assert!(instance.is_factory());
        assert!(instance.is::<WidgetFactory>());

        let product = instance.as_factory().unwrap().get_object().unwrap();
        assert_eq!(product.downcast_ref::<Widget>().unwrap().0, 7);
        assert!(!Instance::new(Widget(0)).is_factory());
    }
}
