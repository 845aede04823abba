//! Reference module container.
//!
//! Modules group providers; providers are singletons, request-scoped or transient and are
//! wired by token. The container implements [`ModuleContainer`], which is all the
//! explorer depends on.

mod builder;
mod provider;

pub use builder::ContainerBuilder;
pub use provider::{Factory, InstanceWrapper, ModuleRef, ProviderId, ResolveCtx, Scope};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::contracts::{ConfigProvider, ModuleContainer};
use crate::error::ContainerError;
use crate::handler::Instance;
use crate::request::{ContextId, RequestRegistry, REQUEST};

pub struct ProviderContainer {
    modules: Vec<Arc<ModuleRef>>,
    providers: HashMap<String, Arc<InstanceWrapper>>,
    init_order: Vec<Arc<InstanceWrapper>>,
    requests: Option<Arc<RequestRegistry>>,
    /// Whether each provider's dependency tree is free of request-scoped parts.
    static_trees: HashMap<ProviderId, bool>,
    per_context: DashMap<(ProviderId, ContextId), Arc<OnceCell<Instance>>>,
    config: Option<Arc<dyn ConfigProvider>>,
}

impl fmt::Debug for ProviderContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modules: Vec<&str> = self.modules.iter().map(|m| m.name()).collect();
        f.debug_struct("ProviderContainer")
            .field("modules", &modules)
            .field("providers", &self.providers.len())
            .field("has_request_registry", &self.requests.is_some())
            .field("live_contexts", &self.per_context.len())
            .finish()
    }
}

impl ProviderContainer {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    pub(crate) fn from_parts(
        modules: Vec<Arc<ModuleRef>>,
        providers: HashMap<String, Arc<InstanceWrapper>>,
        init_order: Vec<Arc<InstanceWrapper>>,
        requests: Option<Arc<RequestRegistry>>,
        config: Option<Arc<dyn ConfigProvider>>,
    ) -> Self {
        // dependencies precede dependents in `init_order`, so one pass settles every tree
        let mut static_trees: HashMap<ProviderId, bool> = HashMap::with_capacity(init_order.len());
        for w in &init_order {
            let is_static = w.scope() != Scope::Request
                && w.deps().iter().all(|dep| {
                    dep != REQUEST
                        && providers
                            .get(dep)
                            .map_or(true, |d| static_trees.get(&d.id()).copied().unwrap_or(false))
                });
            static_trees.insert(w.id(), is_static);
        }

        Self {
            modules,
            providers,
            init_order,
            requests,
            static_trees,
            per_context: DashMap::new(),
            config,
        }
    }

    /// Providers in dependency order.
    pub fn init_order(&self) -> &[Arc<InstanceWrapper>] {
        &self.init_order
    }

    pub fn module_ref(&self, name: &str) -> Option<&Arc<ModuleRef>> {
        self.modules.iter().find(|m| m.name() == name)
    }

    pub fn provider(&self, token: &str) -> Option<&Arc<InstanceWrapper>> {
        self.providers.get(token)
    }

    /// Instantiate every singleton whose dependency tree is static, in dependency order.
    /// Request-bound providers are left as instance-less templates.
    pub async fn init(&self) -> Result<(), ContainerError> {
        let mut created = 0usize;
        for w in &self.init_order {
            if w.scope() != Scope::Singleton || !self.tree_is_static(w) {
                continue;
            }
            if !w.instance.initialized() {
                self.resolve_static(w).await?;
                created += 1;
            }
        }
        tracing::info!(created, "Container initialized");
        Ok(())
    }

    /// Shared instance of `token`, constructed on first use.
    pub async fn get<T: Any + Send + Sync>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        let w = self
            .providers
            .get(token)
            .ok_or_else(|| ContainerError::NotInstantiated(token.to_string()))?;
        if !self.tree_is_static(w) {
            return Err(ContainerError::NotInstantiated(token.to_string()));
        }
        self.resolve_static(w)
            .await?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                token: token.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Drop every instance built for `id` along with its request object.
    pub fn dispose_context(&self, id: ContextId) {
        self.per_context.retain(|(_, ctx), _| *ctx != id);
        if let Some(requests) = &self.requests {
            requests.remove(id);
        }
        tracing::debug!(context = %id, "request context disposed");
    }

    /// Number of request contexts with at least one memoised instance.
    pub fn live_contexts(&self) -> usize {
        let mut ids: Vec<ContextId> = self.per_context.iter().map(|e| e.key().1).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    fn tree_is_static(&self, w: &InstanceWrapper) -> bool {
        self.static_trees.get(&w.id()).copied().unwrap_or(false)
    }

    fn resolve_static<'a>(
        &'a self,
        w: &'a Arc<InstanceWrapper>,
    ) -> BoxFuture<'a, Result<Instance, ContainerError>> {
        Box::pin(async move {
            if w.scope() == Scope::Transient {
                return self.construct(w, None).await;
            }
            w.instance
                .get_or_try_init(|| self.construct(w, None))
                .await
                .cloned()
        })
    }

    fn resolve_in_context<'a>(
        &'a self,
        w: &'a Arc<InstanceWrapper>,
        ctx: ContextId,
    ) -> BoxFuture<'a, Result<Instance, ContainerError>> {
        Box::pin(async move {
            if self.tree_is_static(w) {
                return self.resolve_static(w).await;
            }
            if w.scope() == Scope::Transient {
                return self.construct(w, Some(ctx)).await;
            }
            // Clone the cell out so no shard lock is held across the await.
            let cell = Arc::clone(self.per_context.entry((w.id(), ctx)).or_default().value());
            cell.get_or_try_init(|| self.construct(w, Some(ctx)))
                .await
                .cloned()
        })
    }

    fn construct<'a>(
        &'a self,
        w: &'a Arc<InstanceWrapper>,
        ctx: Option<ContextId>,
    ) -> BoxFuture<'a, Result<Instance, ContainerError>> {
        Box::pin(async move {
            let factory = w
                .factory
                .clone()
                .ok_or_else(|| ContainerError::NotInstantiated(w.token().to_string()))?;

            let mut deps = HashMap::with_capacity(w.deps().len());
            for dep in w.deps() {
                let inst = if dep == REQUEST {
                    self.request_object(ctx)?
                } else {
                    let d = self.providers.get(dep).ok_or_else(|| {
                        ContainerError::UnknownDependency {
                            provider: w.token().to_string(),
                            depends_on: dep.clone(),
                        }
                    })?;
                    match ctx {
                        Some(id) => self.resolve_in_context(d, id).await?,
                        None => self.resolve_static(d).await?,
                    }
                };
                deps.insert(dep.clone(), inst);
            }

            let config = self
                .config
                .as_ref()
                .and_then(|c| c.get_module_config(w.module()))
                .cloned();
            tracing::debug!(provider = w.token(), context = ?ctx, "constructing provider");

            let rctx = ResolveCtx::new(
                w.token().to_string(),
                w.module().to_string(),
                ctx,
                deps,
                config,
            );
            factory(rctx)
                .await
                .map_err(|source| ContainerError::Construction {
                    token: w.token().to_string(),
                    source,
                })
        })
    }

    fn request_object(&self, ctx: Option<ContextId>) -> Result<Instance, ContainerError> {
        let id = ctx.ok_or_else(|| ContainerError::NotInstantiated(REQUEST.to_string()))?;
        self.requests
            .as_ref()
            .and_then(|r| r.get(id))
            .ok_or(ContainerError::RequestUnavailable(id))
    }
}

#[async_trait]
impl ModuleContainer for ProviderContainer {
    fn modules(&self) -> Vec<Arc<ModuleRef>> {
        self.modules.clone()
    }

    fn is_dependency_tree_static(&self, wrapper: &InstanceWrapper) -> bool {
        self.tree_is_static(wrapper)
    }

    fn dispose_context(&self, context_id: ContextId) {
        ProviderContainer::dispose_context(self, context_id)
    }

    async fn load_per_context(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &ModuleRef,
        context_id: ContextId,
    ) -> Result<Instance, ContainerError> {
        if !module.contains(wrapper.id()) {
            return Err(ContainerError::ForeignProvider {
                provider: wrapper.token().to_string(),
                module: module.name().to_string(),
            });
        }
        self.resolve_in_context(wrapper, context_id).await
    }

    fn request_registry(&self) -> Option<Arc<RequestRegistry>> {
        self.requests.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Db {
        id: usize,
    }
    struct Session {
        user: String,
        db: Arc<Db>,
    }
    struct Greeter {
        session: Arc<Session>,
    }

    fn counting_container(builds: Arc<AtomicUsize>) -> ProviderContainer {
        let mut b = ProviderContainer::builder();
        b.module("app", &[]);
        let db_builds = Arc::clone(&builds);
        b.factory("app", "db", Scope::Singleton, &[], move |_ctx| {
            let id = db_builds.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Db { id }) }
        });
        let session_builds = Arc::clone(&builds);
        b.factory("app", "session", Scope::Request, &["db", REQUEST], move |ctx| {
            session_builds.fetch_add(1, Ordering::SeqCst);
            async move {
                let user = ctx.request::<String>()?;
                Ok::<_, anyhow::Error>(Session {
                    user: user.as_ref().clone(),
                    db: ctx.get::<Db>("db")?,
                })
            }
        });
        b.factory("app", "greeter", Scope::Singleton, &["session"], |ctx| async move {
            Ok::<_, anyhow::Error>(Greeter {
                session: ctx.get::<Session>("session")?,
            })
        });
        b.build().unwrap()
    }

    #[tokio::test]
    async fn init_creates_only_static_singletons() {
        let builds = Arc::new(AtomicUsize::new(0));
        let c = counting_container(Arc::clone(&builds));
        c.init().await.unwrap();

        assert!(c.provider("db").unwrap().instance().is_some());
        assert!(c.provider("session").unwrap().instance().is_none());
        assert!(c.provider("greeter").unwrap().instance().is_none());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_dependency_makes_the_tree_dynamic() {
        let c = counting_container(Arc::new(AtomicUsize::new(0)));
        assert!(c.is_dependency_tree_static(c.provider("db").unwrap()));
        assert!(!c.is_dependency_tree_static(c.provider("session").unwrap()));
        // singleton scope, but depends on a request-scoped provider
        assert!(!c.is_dependency_tree_static(c.provider("greeter").unwrap()));
    }

    #[test]
    fn deep_diamonds_are_classified_at_build() {
        const LAYERS: usize = 64;
        let mut b = ProviderContainer::builder();
        b.module("app", &[]);
        b.factory("app", "l0a", Scope::Singleton, &[], |_ctx| async { Ok(0u32) });
        b.factory("app", "l0b", Scope::Singleton, &[], |_ctx| async { Ok(0u32) });
        for layer in 1..LAYERS {
            let below = [format!("l{}a", layer - 1), format!("l{}b", layer - 1)];
            let deps: Vec<&str> = below.iter().map(String::as_str).collect();
            for side in ["a", "b"] {
                let token = format!("l{layer}{side}");
                b.factory("app", &token, Scope::Singleton, &deps, |_ctx| async { Ok(0u32) });
            }
        }
        let top = format!("l{}a", LAYERS - 1);
        b.factory("app", "edge", Scope::Singleton, &[top.as_str(), REQUEST], |_ctx| async {
            Ok(0u32)
        });
        let c = b.build().unwrap();

        // every layer reaches the bottom through 2^depth paths
        assert!(c.is_dependency_tree_static(c.provider(&top).unwrap()));
        assert!(!c.is_dependency_tree_static(c.provider("edge").unwrap()));
        assert!(c
            .init_order()
            .iter()
            .filter(|w| w.token() != "edge")
            .all(|w| c.is_dependency_tree_static(w)));
    }

    #[tokio::test]
    async fn per_context_instances_are_memoised() {
        let c = counting_container(Arc::new(AtomicUsize::new(0)));
        c.init().await.unwrap();
        let app = Arc::clone(c.module_ref("app").unwrap());
        let greeter = Arc::clone(c.provider("greeter").unwrap());
        let requests = c.request_registry().unwrap();

        let a = ContextId::new();
        let b = ContextId::new();
        requests.register(a, Arc::new("alice".to_string()));
        requests.register(b, Arc::new("bob".to_string()));

        let (a1, a2) = tokio::join!(
            c.load_per_context(&greeter, &app, a),
            c.load_per_context(&greeter, &app, a)
        );
        let a1 = a1.unwrap().downcast::<Greeter>().unwrap();
        let a2 = a2.unwrap().downcast::<Greeter>().unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(a1.session.user, "alice");

        let b1 = c
            .load_per_context(&greeter, &app, b)
            .await
            .unwrap()
            .downcast::<Greeter>()
            .unwrap();
        assert!(!Arc::ptr_eq(&a1, &b1));
        assert_eq!(b1.session.user, "bob");

        // the static singleton is shared by both trees
        assert!(Arc::ptr_eq(&a1.session.db, &b1.session.db));
        assert_eq!(a1.session.db.id, 0);
        assert_eq!(c.live_contexts(), 2);
    }

    #[tokio::test]
    async fn missing_request_object_fails_construction() {
        let c = counting_container(Arc::new(AtomicUsize::new(0)));
        let app = Arc::clone(c.module_ref("app").unwrap());
        let session = Arc::clone(c.provider("session").unwrap());

        let id = ContextId::new();
        let err = c.load_per_context(&session, &app, id).await.unwrap_err();
        assert!(matches!(err, ContainerError::RequestUnavailable(ctx) if ctx == id));
    }

    #[tokio::test]
    async fn dispose_context_drops_memo_and_request() {
        let c = counting_container(Arc::new(AtomicUsize::new(0)));
        let app = Arc::clone(c.module_ref("app").unwrap());
        let session = Arc::clone(c.provider("session").unwrap());
        let id = ContextId::new();
        c.request_registry()
            .unwrap()
            .register(id, Arc::new("carol".to_string()));

        c.load_per_context(&session, &app, id).await.unwrap();
        assert_eq!(c.live_contexts(), 1);

        c.dispose_context(id);
        assert_eq!(c.live_contexts(), 0);
        assert!(!c.request_registry().unwrap().contains(id));
    }

    #[tokio::test]
    async fn foreign_module_is_rejected() {
        let mut b = ProviderContainer::builder();
        b.module("a", &[]).module("b", &[]);
        b.factory("a", "x", Scope::Request, &[], |_ctx| async { Ok(1u32) });
        let c = b.build().unwrap();

        let x = Arc::clone(c.provider("x").unwrap());
        let other = Arc::clone(c.module_ref("b").unwrap());
        let err = c
            .load_per_context(&x, &other, ContextId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::ForeignProvider { .. }));
    }

    #[tokio::test]
    async fn transient_providers_are_rebuilt_each_time() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let mut b = ProviderContainer::builder();
        b.module("a", &[]);
        b.factory("a", "t", Scope::Transient, &[], move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        let c = b.build().unwrap();

        c.get::<()>("t").await.unwrap();
        c.get::<()>("t").await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn construction_errors_keep_their_source() {
        let mut b = ProviderContainer::builder();
        b.module("a", &[]);
        b.factory("a", "broken", Scope::Singleton, &[], |_ctx| async {
            Err::<u8, _>(anyhow::anyhow!("disk on fire"))
        });
        let c = b.build().unwrap();

        let err = c.init().await.unwrap_err();
        match err {
            ContainerError::Construction { token, source } => {
                assert_eq!(token, "broken");
                assert_eq!(source.to_string(), "disk on fire");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn factories_read_module_config() {
        struct Cfg(serde_json::Value);
        impl ConfigProvider for Cfg {
            fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
                (module_name == "a").then_some(&self.0)
            }
        }

        #[derive(serde::Deserialize, Default)]
        struct Limits {
            max: u32,
        }

        let mut b = ProviderContainer::builder();
        b.module("a", &[]);
        b.with_config(Arc::new(Cfg(serde_json::json!({"max": 7}))));
        b.factory("a", "limits", Scope::Singleton, &[], |ctx| async move {
            ctx.config::<Limits>()
        });
        let c = b.build().unwrap();

        assert_eq!(c.get::<Limits>("limits").await.unwrap().max, 7);
    }
}
