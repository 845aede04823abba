use anyhow::Context as _;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::ContainerError;
use crate::handler::Instance;
use crate::request::{ContextId, REQUEST};

/// Provider lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One instance per container, unless a dependency forces per-request rebuilds.
    Singleton,
    /// One instance per request context.
    Request,
    /// A new instance per injection.
    Transient,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(pub(crate) usize);

/// Provider construction closure.
pub type Factory =
    Arc<dyn Fn(ResolveCtx) -> BoxFuture<'static, anyhow::Result<Instance>> + Send + Sync>;

/// A provider registered in a module: its identity, scope, dependencies, and the
/// shared instance once one exists.
pub struct InstanceWrapper {
    pub(crate) id: ProviderId,
    pub(crate) token: String,
    pub(crate) module: String,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) scope: Scope,
    pub(crate) deps: Vec<String>,
    pub(crate) factory: Option<Factory>,
    pub(crate) instance: OnceCell<Instance>,
}

impl InstanceWrapper {
    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    /// The shared instance, if one has been created.
    pub fn instance(&self) -> Option<Instance> {
        self.instance.get().cloned()
    }
}

impl fmt::Debug for InstanceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceWrapper")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("module", &self.module)
            .field("type_name", &self.type_name)
            .field("scope", &self.scope)
            .field("deps", &self.deps)
            .field("has_instance", &self.instance.initialized())
            .finish()
    }
}

/// A module and the providers it declares, in registration order.
#[derive(Debug)]
pub struct ModuleRef {
    pub(crate) name: String,
    pub(crate) imports: Vec<String>,
    pub(crate) providers: Vec<Arc<InstanceWrapper>>,
}

impl ModuleRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn providers(&self) -> &[Arc<InstanceWrapper>] {
        &self.providers
    }

    pub fn provider(&self, token: &str) -> Option<&Arc<InstanceWrapper>> {
        self.providers.iter().find(|p| p.token == token)
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.providers.iter().any(|p| p.id == id)
    }
}

/// What a factory sees while constructing its provider.
pub struct ResolveCtx {
    token: String,
    module: String,
    context_id: Option<ContextId>,
    deps: HashMap<String, Instance>,
    config: Option<serde_json::Value>,
}

impl ResolveCtx {
    pub(crate) fn new(
        token: String,
        module: String,
        context_id: Option<ContextId>,
        deps: HashMap<String, Instance>,
        config: Option<serde_json::Value>,
    ) -> Self {
        Self {
            token,
            module,
            context_id,
            deps,
            config,
        }
    }

    /// A declared dependency, downcast to `T`.
    pub fn get<T: Any + Send + Sync>(&self, token: &str) -> Result<Arc<T>, ContainerError> {
        let inst = self
            .deps
            .get(token)
            .ok_or_else(|| ContainerError::UnknownDependency {
                provider: self.token.clone(),
                depends_on: token.to_string(),
            })?;
        Arc::clone(inst)
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                token: token.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// The inbound request; requires a declared dependency on [`REQUEST`].
    pub fn request<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ContainerError> {
        self.get(REQUEST)
    }

    /// Request context this construction runs in; `None` for shared instances.
    pub fn context_id(&self) -> Option<ContextId> {
        self.context_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Typed view of the owning module's configuration; defaults when none is provided.
    pub fn config<T: DeserializeOwned + Default>(&self) -> anyhow::Result<T> {
        match &self.config {
            Some(raw) => serde_json::from_value(raw.clone())
                .with_context(|| format!("invalid config for module '{}'", self.module)),
            None => Ok(T::default()),
        }
    }
}
