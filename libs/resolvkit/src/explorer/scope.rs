use dashmap::DashMap;
use std::sync::Arc;

use crate::container::{InstanceWrapper, ModuleRef, ProviderId};
use crate::contracts::ModuleContainer;
use crate::error::ContainerError;
use crate::handler::Instance;
use crate::request::ContextId;

/// Per-provider static/request-scoped classification and per-request instantiation.
///
/// The classification is asked of the container once per provider and cached for the
/// resolver's lifetime; later readers always see the first answer.
pub struct ScopeResolver {
    container: Arc<dyn ModuleContainer>,
    cache: DashMap<ProviderId, bool>,
}

impl ScopeResolver {
    pub fn new(container: Arc<dyn ModuleContainer>) -> Self {
        Self {
            container,
            cache: DashMap::new(),
        }
    }

    pub fn is_static(&self, wrapper: &InstanceWrapper) -> bool {
        let id = wrapper.id();
        if let Some(known) = self.cache.get(&id) {
            return *known;
        }
        // no shard lock may be held while the container is consulted
        let computed = self.container.is_dependency_tree_static(wrapper);
        *self.cache.entry(id).or_insert(computed)
    }

    /// Build, or fetch if already built, the instance tree of `wrapper` for `context_id`.
    pub async fn instantiate_per_request(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &ModuleRef,
        context_id: ContextId,
    ) -> Result<Instance, ContainerError> {
        tracing::debug!(
            provider = wrapper.token(),
            module = module.name(),
            context = %context_id,
            "instantiating request-scoped provider"
        );
        self.container
            .load_per_context(wrapper, module, context_id)
            .await
    }

    /// Release everything the container memoised for `context_id`.
    pub fn dispose(&self, context_id: ContextId) {
        tracing::trace!(context = %context_id, "disposing request context");
        self.container.dispose_context(context_id);
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Disposes one request context when dropped.
pub struct ContextGuard {
    scopes: Arc<ScopeResolver>,
    context_id: ContextId,
}

impl ContextGuard {
    pub fn new(scopes: Arc<ScopeResolver>, context_id: ContextId) -> Self {
        Self { scopes, context_id }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.scopes.dispose(self.context_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ProviderContainer, Scope};
    use crate::request::{RequestRegistry, REQUEST};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{OnceLock, Weak};

    struct Counting {
        inner: ProviderContainer,
        asked: AtomicUsize,
        // a resolver consulted from inside the classification callback
        reentrant: OnceLock<Weak<ScopeResolver>>,
        seen_cached: AtomicUsize,
    }

    #[async_trait]
    impl ModuleContainer for Counting {
        fn modules(&self) -> Vec<Arc<ModuleRef>> {
            self.inner.modules()
        }

        fn is_dependency_tree_static(&self, wrapper: &InstanceWrapper) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            if let Some(scopes) = self.reentrant.get().and_then(Weak::upgrade) {
                self.seen_cached.store(scopes.cached(), Ordering::SeqCst);
                if wrapper.token() == "scoped" {
                    let shared = self.inner.provider("shared").map(Arc::clone);
                    if let Some(shared) = shared {
                        scopes.is_static(&shared);
                    }
                }
            }
            self.inner.is_dependency_tree_static(wrapper)
        }

        async fn load_per_context(
            &self,
            wrapper: &Arc<InstanceWrapper>,
            module: &ModuleRef,
            context_id: ContextId,
        ) -> Result<Instance, ContainerError> {
            self.inner.load_per_context(wrapper, module, context_id).await
        }

        fn request_registry(&self) -> Option<Arc<RequestRegistry>> {
            self.inner.request_registry()
        }

        fn dispose_context(&self, context_id: ContextId) {
            self.inner.dispose_context(context_id)
        }
    }

    fn counting() -> Arc<Counting> {
        let mut b = ProviderContainer::builder();
        b.module("m", &[]);
        b.singleton("m", "shared", 1u8);
        b.factory("m", "scoped", Scope::Request, &[REQUEST], |_ctx| async { Ok(2u8) });
        Arc::new(Counting {
            inner: b.build().unwrap(),
            asked: AtomicUsize::new(0),
            reentrant: OnceLock::new(),
            seen_cached: AtomicUsize::new(0),
        })
    }

    #[test]
    fn classification_is_cached_per_provider() {
        let container = counting();
        let scopes = ScopeResolver::new(container.clone());
        let shared = Arc::clone(container.inner.provider("shared").unwrap());
        let scoped = Arc::clone(container.inner.provider("scoped").unwrap());

        for _ in 0..3 {
            assert!(scopes.is_static(&shared));
            assert!(!scopes.is_static(&scoped));
        }
        assert_eq!(container.asked.load(Ordering::SeqCst), 2);
        assert_eq!(scopes.cached(), 2);
    }

    #[test]
    fn container_may_reenter_the_resolver_while_classifying() {
        let container = counting();
        let scopes = Arc::new(ScopeResolver::new(container.clone()));
        container.reentrant.set(Arc::downgrade(&scopes)).ok();
        let scoped = Arc::clone(container.inner.provider("scoped").unwrap());
        let shared = Arc::clone(container.inner.provider("shared").unwrap());

        // classifying `scoped` reads the cache and classifies `shared` from the callback
        assert!(!scopes.is_static(&scoped));
        assert_eq!(container.seen_cached.load(Ordering::SeqCst), 0);
        assert!(scopes.is_static(&shared));
        assert_eq!(scopes.cached(), 2);
        assert_eq!(container.asked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn guard_disposes_its_context_on_drop() {
        let container = counting();
        let scopes = Arc::new(ScopeResolver::new(container.clone()));
        let scoped = Arc::clone(container.inner.provider("scoped").unwrap());
        let module = Arc::clone(container.inner.module_ref("m").unwrap());
        let registry = container.request_registry().unwrap();

        let id = ContextId::new();
        registry.register(id, Arc::new("erin".to_string()));
        let guard = ContextGuard::new(Arc::clone(&scopes), id);
        scopes.instantiate_per_request(&scoped, &module, id).await.unwrap();
        assert_eq!(container.inner.live_contexts(), 1);
        assert_eq!(guard.context_id(), id);

        drop(guard);
        assert_eq!(container.inner.live_contexts(), 0);
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn instantiation_errors_propagate_verbatim() {
        let container = counting();
        let scopes = ScopeResolver::new(container.clone());
        let scoped = Arc::clone(container.inner.provider("scoped").unwrap());
        let module = Arc::clone(container.inner.module_ref("m").unwrap());

        let id = ContextId::new();
        let err = scopes
            .instantiate_per_request(&scoped, &module, id)
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::RequestUnavailable(ctx) if ctx == id));
    }
}
