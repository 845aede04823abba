use async_trait::async_trait;
use std::sync::Arc;

use crate::container::{InstanceWrapper, ModuleRef};
use crate::error::ContainerError;
use crate::handler::Instance;
use crate::request::{ContextId, RequestRegistry};

/// Source of per-module configuration sections (raw JSON by module name).
pub trait ConfigProvider: Send + Sync {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value>;
}

/// Dependency-injection container as seen by the resolver explorer.
///
/// The explorer never instantiates providers itself; it enumerates what the container
/// holds, asks it how a provider is scoped, and delegates per-request construction.
#[async_trait]
pub trait ModuleContainer: Send + Sync {
    /// All modules, in a stable order.
    fn modules(&self) -> Vec<Arc<ModuleRef>>;

    fn module(&self, name: &str) -> Option<Arc<ModuleRef>> {
        self.modules().into_iter().find(|m| m.name() == name)
    }

    /// `true` when the provider and all of its transitive dependencies can be shared
    /// across requests.
    fn is_dependency_tree_static(&self, wrapper: &InstanceWrapper) -> bool;

    /// Build (or fetch, if already built for `context_id`) the request-scoped instance
    /// tree rooted at `wrapper`. Concurrent calls for one context observe one instance.
    async fn load_per_context(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &ModuleRef,
        context_id: ContextId,
    ) -> Result<Instance, ContainerError>;

    /// The internal `REQUEST` provider's per-context store, if the container has one.
    fn request_registry(&self) -> Option<Arc<RequestRegistry>>;

    /// Forget every instance memoised for `context_id`, and its request object.
    fn dispose_context(&self, context_id: ContextId);
}
