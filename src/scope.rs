//! Custom scopes
//!
//! `singleton` and `prototype` are handled by the container itself. Every other
//! scope name is delegated to a [`ScopeStrategy`] registered under that name.
//! Two strategies are bundled:
//!
//! - [`ThreadScope`]: one instance per name per thread
//! - [`CallScope`]: one instance per name per explicitly entered call context

use crate::descriptor::ScopeKind;
use crate::error::{ResolveError, Result, ScopeError};
use crate::instance::Instance;
use crate::singleton::DestructionCallback;
use crate::storage::name_map;
use ahash::{AHashMap, RandomState};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

#[cfg(feature = "logging")]
use tracing::{debug, info, warn};

/// Lifecycle strategy for one custom scope name
pub trait ScopeStrategy: Send + Sync {
    /// Return the instance bound to `name` in the current context, creating it
    /// through `factory` when absent
    fn get(
        &self,
        name: &str,
        factory: &dyn Fn() -> Result<Instance>,
    ) -> std::result::Result<Instance, ScopeError>;

    /// Unbind `name` from the current context; its destruction callback is dropped, not run
    fn remove(&self, name: &str) -> Option<Instance>;

    /// Run `callback` when `name` is destroyed with its context
    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback);

    /// Identifier of the current context, if any
    fn context_id(&self) -> Option<String>;
}

/// Unique scope context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique id.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

// =============================================================================
// Scope Registry
// =============================================================================

pub(crate) struct ScopeRegistry {
    scopes: DashMap<String, Arc<dyn ScopeStrategy>, RandomState>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self {
            scopes: name_map(0),
        }
    }

    /// Register `strategy` under `name`, replacing any previous one.
    ///
    /// The built-in scope names are rejected.
    pub fn register(&self, name: &str, strategy: Arc<dyn ScopeStrategy>) -> Result<()> {
        if name == ScopeKind::SINGLETON || name == ScopeKind::PROTOTYPE {
            return Err(ResolveError::ReservedScope {
                scope: name.to_owned(),
            });
        }

        let _previous = self.scopes.insert(name.to_owned(), strategy);

        #[cfg(feature = "logging")]
        if _previous.is_some() {
            info!(
                target: "component_resolver",
                scope = name,
                "Replacing scope strategy"
            );
        } else {
            debug!(
                target: "component_resolver",
                scope = name,
                "Registered scope strategy"
            );
        }

        Ok(())
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ScopeStrategy>> {
        self.scopes.get(name).map(|s| Arc::clone(s.value()))
    }

    pub fn names(&self) -> Vec<String> {
        self.scopes.iter().map(|r| r.key().clone()).collect()
    }
}

// =============================================================================
// Thread Scope
// =============================================================================

/// One instance per component name per thread.
///
/// Instances live as long as the scope itself; destruction callbacks are not
/// supported and are dropped with a warning. Entries are not released when a
/// thread exits: worker threads call [`clear_current_thread`](Self::clear_current_thread)
/// before they finish.
pub struct ThreadScope {
    instances: DashMap<(ThreadId, String), Instance, RandomState>,
}

impl ThreadScope {
    pub fn new() -> Self {
        Self {
            instances: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Drop every instance held for the calling thread, returning how many
    pub fn clear_current_thread(&self) -> usize {
        let me = thread::current().id();
        let mut removed = 0;
        self.instances.retain(|(owner, _), _| {
            let mine = *owner == me;
            removed += usize::from(mine);
            !mine
        });
        removed
    }

    /// Instances held across all threads
    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl Default for ThreadScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStrategy for ThreadScope {
    fn get(
        &self,
        name: &str,
        factory: &dyn Fn() -> Result<Instance>,
    ) -> std::result::Result<Instance, ScopeError> {
        let key = (thread::current().id(), name.to_owned());
        if let Some(instance) = self.instances.get(&key) {
            return Ok(instance.value().clone());
        }

        let instance = factory()?;
        Ok(self.instances.entry(key).or_insert(instance).value().clone())
    }

    fn remove(&self, name: &str) -> Option<Instance> {
        let key = (thread::current().id(), name.to_owned());
        self.instances.remove(&key).map(|(_, instance)| instance)
    }

    fn register_destruction_callback(&self, _name: &str, _callback: DestructionCallback) {
        #[cfg(feature = "logging")]
        warn!(
            target: "component_resolver",
            component = _name,
            "Thread scope does not support destruction callbacks"
        );
    }

    fn context_id(&self) -> Option<String> {
        Some(format!("{:?}", thread::current().id()))
    }
}

// =============================================================================
// Call Scope
// =============================================================================

struct CallContext {
    id: ScopeId,
    instances: AHashMap<String, Instance>,
    callbacks: Vec<(String, DestructionCallback)>,
}

impl CallContext {
    fn new() -> Self {
        Self {
            id: ScopeId::new(),
            instances: AHashMap::new(),
            callbacks: Vec::new(),
        }
    }
}

/// One instance per component name per call context.
///
/// A context is entered explicitly on the current thread and lasts until the
/// returned guard drops, at which point destruction callbacks run in reverse
/// registration order. Outside a context the scope is inactive.
///
/// # Examples
///
/// ```rust
/// use component_resolver::{CallScope, ScopeStrategy};
/// use std::sync::Arc;
///
/// let scope = Arc::new(CallScope::new());
/// assert!(scope.context_id().is_none());
///
/// {
///     let _call = scope.enter();
///     assert!(scope.context_id().is_some());
/// }
///
/// assert!(!scope.is_active());
/// ```
pub struct CallScope {
    contexts: DashMap<ThreadId, CallContext, RandomState>,
}

impl CallScope {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Enter a fresh call context on the current thread
    pub fn enter(self: &Arc<Self>) -> CallScopeGuard {
        let thread = thread::current().id();
        let context = CallContext::new();

        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            scope_id = context.id.id(),
            "Entering call context"
        );

        let previous = self.contexts.insert(thread, context);
        CallScopeGuard {
            scope: Arc::clone(self),
            thread,
            previous,
        }
    }

    /// Whether a context is bound to the current thread
    #[inline]
    pub fn is_active(&self) -> bool {
        self.contexts.contains_key(&thread::current().id())
    }
}

impl Default for CallScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStrategy for CallScope {
    fn get(
        &self,
        name: &str,
        factory: &dyn Fn() -> Result<Instance>,
    ) -> std::result::Result<Instance, ScopeError> {
        let thread = thread::current().id();
        match self.contexts.get(&thread) {
            Some(context) => {
                if let Some(instance) = context.instances.get(name) {
                    return Ok(instance.clone());
                }
            }
            None => {
                return Err(ScopeError::Inactive(
                    "no call context is bound to the current thread".to_owned(),
                ));
            }
        }

        // No guard held here: the factory may resolve other call-scoped components.
        let instance = factory()?;

        let mut context = self.contexts.get_mut(&thread).ok_or_else(|| {
            ScopeError::Inactive("call context ended during creation".to_owned())
        })?;
        Ok(context
            .instances
            .entry(name.to_owned())
            .or_insert(instance)
            .clone())
    }

    fn remove(&self, name: &str) -> Option<Instance> {
        let mut context = self.contexts.get_mut(&thread::current().id())?;
        context.callbacks.retain(|(n, _)| n != name);
        context.instances.remove(name)
    }

    fn register_destruction_callback(&self, name: &str, callback: DestructionCallback) {
        match self.contexts.get_mut(&thread::current().id()) {
            Some(mut context) => context.callbacks.push((name.to_owned(), callback)),
            None => {
                #[cfg(feature = "logging")]
                warn!(
                    target: "component_resolver",
                    component = name,
                    "No active call context, destruction callback dropped"
                );
            }
        }
    }

    fn context_id(&self) -> Option<String> {
        self.contexts
            .get(&thread::current().id())
            .map(|c| c.id.to_string())
    }
}

/// Ends a call context on drop
pub struct CallScopeGuard {
    scope: Arc<CallScope>,
    thread: ThreadId,
    previous: Option<CallContext>,
}

impl CallScopeGuard {
    /// Id of the context this guard owns
    pub fn id(&self) -> Option<ScopeId> {
        self.scope.contexts.get(&self.thread).map(|c| c.id)
    }
}

impl Drop for CallScopeGuard {
    fn drop(&mut self) {
        let ended = match self.previous.take() {
            Some(previous) => self.scope.contexts.insert(self.thread, previous),
            None => self.scope.contexts.remove(&self.thread).map(|(_, c)| c),
        };

        if let Some(context) = ended {
            #[cfg(feature = "logging")]
            debug!(
                target: "component_resolver",
                scope_id = context.id.id(),
                callbacks = context.callbacks.len(),
                "Ending call context"
            );

            for (_, callback) in context.callbacks.into_iter().rev() {
                callback();
            }
        }
    }
}

impl std::fmt::Debug for CallScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallScopeGuard")
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn counting_factory(counter: &AtomicUsize) -> impl Fn() -> Result<Instance> + '_ {
        move || Ok(Instance::new(counter.fetch_add(1, Ordering::SeqCst)))
    }

    #[test]
    fn test_scope_ids_unique() {
        let s1 = ScopeId::new();
        let s2 = ScopeId::new();
        assert_ne!(s1.id(), s2.id());
        assert!(s1.to_string().starts_with("scope-"));
    }

    #[test]
    fn test_registry_rejects_builtin_names() {
        let registry = ScopeRegistry::new();
        for reserved in ["singleton", "prototype"] {
            let err = registry
                .register(reserved, Arc::new(ThreadScope::new()))
                .unwrap_err();
            assert!(matches!(err, ResolveError::ReservedScope { .. }));
        }

        registry.register("thread", Arc::new(ThreadScope::new())).unwrap();
        registry.register("thread", Arc::new(ThreadScope::new())).unwrap();
        assert_eq!(registry.names(), vec!["thread".to_string()]);
        assert!(registry.get("thread").is_some());
        assert!(registry.get("request").is_none());
    }

    #[test]
    fn test_thread_scope_per_thread() {
        let scope = Arc::new(ThreadScope::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let a = scope.get("svc", &counting_factory(&counter)).unwrap();
        let b = scope.get("svc", &counting_factory(&counter)).unwrap();
        assert!(a.ptr_eq(&b));

        let other_scope = Arc::clone(&scope);
        let other_counter = Arc::clone(&counter);
        let c = thread::spawn(move || other_scope.get("svc", &counting_factory(&other_counter)).unwrap())
            .join()
            .unwrap();

        assert!(!a.ptr_eq(&c));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(scope.remove("svc").is_some());
        assert!(scope.remove("svc").is_none());
    }

    #[test]
    fn test_thread_scope_clear_current_thread() {
        let scope = Arc::new(ThreadScope::new());
        let counter = Arc::new(AtomicUsize::new(0));
        scope.get("svc", &counting_factory(&counter)).unwrap();

        let worker_scope = Arc::clone(&scope);
        let worker_counter = Arc::clone(&counter);
        let cleared = thread::spawn(move || {
            worker_scope.get("svc", &counting_factory(&worker_counter)).unwrap();
            worker_scope.get("other", &counting_factory(&worker_counter)).unwrap();
            worker_scope.clear_current_thread()
        })
        .join()
        .unwrap();

        assert_eq!(cleared, 2);
        assert_eq!(scope.len(), 1);
        assert!(scope.remove("svc").is_some());
        assert!(scope.is_empty());
    }

    #[test]
    fn test_call_scope_inactive() {
        let scope = CallScope::new();
        let counter = AtomicUsize::new(0);
        let err = scope.get("svc", &counting_factory(&counter)).unwrap_err();
        assert!(matches!(err, ScopeError::Inactive(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_call_scope_context_lifecycle() {
        let scope = Arc::new(CallScope::new());
        let counter = AtomicUsize::new(0);
        let destroyed = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let _call = scope.enter();
            let a = scope.get("svc", &counting_factory(&counter)).unwrap();
            let b = scope.get("svc", &counting_factory(&counter)).unwrap();
            assert!(a.ptr_eq(&b));

            for name in ["first", "second"] {
                let destroyed = Arc::clone(&destroyed);
                scope.register_destruction_callback(
                    name,
                    Box::new(move || destroyed.lock().unwrap().push(name)),
                );
            }
            a
        };

        assert_eq!(*destroyed.lock().unwrap(), vec!["second", "first"]);
        assert!(!scope.is_active());

        let _call = scope.enter();
        let fresh = scope.get("svc", &counting_factory(&counter)).unwrap();
        assert!(!first.ptr_eq(&fresh));
    }

    #[test]
    fn test_call_scope_nested_restores_outer() {
        let scope = Arc::new(CallScope::new());
        let outer = scope.enter();
        let outer_id = outer.id();
        {
            let inner = scope.enter();
            assert_ne!(inner.id(), outer_id);
        }
        assert_eq!(scope.context_id(), outer_id.map(|id| id.to_string()));
    }

    #[test]
    fn test_call_scope_remove_drops_callback() {
        let scope = Arc::new(CallScope::new());
        let counter = AtomicUsize::new(0);
        let ran = Arc::new(AtomicUsize::new(0));

        {
            let _call = scope.enter();
            scope.get("svc", &counting_factory(&counter)).unwrap();
            let ran = Arc::clone(&ran);
            scope.register_destruction_callback(
                "svc",
                Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
            );
            assert!(scope.remove("svc").is_some());
        }

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
