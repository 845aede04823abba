//! Resolver discovery.
//!
//! [`ResolversExplorer::explore`] walks every provider of the included modules, looks up
//! handler metadata for each of its methods, keeps the handlers the classifier accepts,
//! binds them to the right instance and groups the result by role.

pub mod binder;
pub mod classify;
pub mod scope;
pub mod subscription;

pub use binder::{BindTarget, ContextBinder, RequestScoped};
pub use classify::include;
pub use scope::{ContextGuard, ScopeResolver};
pub use subscription::compose;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::sync::Arc;

use crate::container::{InstanceWrapper, ModuleRef};
use crate::contracts::ModuleContainer;
use crate::descriptor::{HandlerDescriptor, HandlerRole, ResolverGroups};
use crate::error::ExploreError;
use crate::external_context::ExternalContextCreator;
use crate::handler::{Callback, MethodBody, MethodTransform};
use crate::metadata::{scan_methods, MetadataTable};
use crate::params::{ParamsFactory, CONTEXT_INDEX};

/// Discovery settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerOptions {
    /// Modules to scan; empty means every module of the container.
    pub include: Vec<String>,
    /// Positional argument carrying the request object of a handler call.
    pub request_arg_index: usize,
}

impl Default for ExplorerOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            request_arg_index: CONTEXT_INDEX,
        }
    }
}

pub struct ResolversExplorer {
    container: Arc<dyn ModuleContainer>,
    metadata: Arc<MetadataTable>,
    options: ExplorerOptions,
    scopes: Arc<ScopeResolver>,
    binder: ContextBinder,
    transform: Option<MethodTransform<Value>>,
    current: ArcSwapOption<ResolverGroups>,
}

impl ResolversExplorer {
    pub fn new(
        container: Arc<dyn ModuleContainer>,
        metadata: Arc<MetadataTable>,
        options: ExplorerOptions,
    ) -> Self {
        let scopes = Arc::new(ScopeResolver::new(Arc::clone(&container)));
        let binder = ContextBinder::new(
            Arc::clone(&scopes),
            ExternalContextCreator::default(),
            container.request_registry(),
            options.request_arg_index,
        );
        Self {
            container,
            metadata,
            options,
            scopes,
            binder,
            transform: None,
            current: ArcSwapOption::empty(),
        }
    }

    /// Decode handler parameters with `factory` instead of the default calling convention.
    pub fn with_params_factory(mut self, factory: Arc<dyn ParamsFactory>) -> Self {
        self.binder = ContextBinder::new(
            Arc::clone(&self.scopes),
            ExternalContextCreator::new(factory),
            self.container.request_registry(),
            self.options.request_arg_index,
        );
        self
    }

    /// Rewrite every query, mutation and field handler right before it is bound.
    pub fn with_transform(mut self, transform: MethodTransform<Value>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn options(&self) -> &ExplorerOptions {
        &self.options
    }

    pub fn scopes(&self) -> &ScopeResolver {
        &self.scopes
    }

    /// Run a discovery pass and publish its result as [`Self::current`].
    pub fn explore(&self) -> Result<Arc<ResolverGroups>, ExploreError> {
        let modules = self.included_modules()?;

        let mut descriptors = Vec::new();
        for module in &modules {
            for wrapper in module.providers() {
                descriptors.extend(self.explore_provider(module, wrapper));
            }
        }

        let groups = Arc::new(ResolverGroups::from_descriptors(descriptors));
        tracing::info!(
            modules = modules.len(),
            handlers = groups.len(),
            queries = groups.get(HandlerRole::Query).len(),
            mutations = groups.get(HandlerRole::Mutation).len(),
            subscriptions = groups.get(HandlerRole::Subscription).len(),
            "Resolver discovery complete"
        );
        self.current.store(Some(Arc::clone(&groups)));
        Ok(groups)
    }

    /// Result of the latest discovery pass.
    pub fn current(&self) -> Option<Arc<ResolverGroups>> {
        self.current.load_full()
    }

    fn included_modules(&self) -> Result<Vec<Arc<ModuleRef>>, ExploreError> {
        if self.options.include.is_empty() {
            return Ok(self.container.modules());
        }
        self.options
            .include
            .iter()
            .map(|name| {
                self.container
                    .module(name)
                    .ok_or_else(|| ExploreError::UnknownModule(name.clone()))
            })
            .collect()
    }

    fn explore_provider(
        &self,
        module: &Arc<ModuleRef>,
        wrapper: &Arc<InstanceWrapper>,
    ) -> Vec<HandlerDescriptor> {
        let chain = self.metadata.chain(wrapper.type_id());
        if chain.is_empty() {
            return Vec::new();
        }

        let is_static = self.scopes.is_static(wrapper);
        let instance = wrapper.instance();
        if is_static && instance.is_none() {
            tracing::debug!(provider = wrapper.token(), "skipping provider without a live instance");
            return Vec::new();
        }

        let target = BindTarget {
            instance,
            wrapper: Arc::clone(wrapper),
            module: Arc::clone(module),
            is_request_scoped: !is_static,
        };
        scan_methods(&self.metadata, &chain)
            .into_iter()
            .filter_map(|name| self.explore_method(&chain, name, &target))
            .collect()
    }

    fn explore_method(
        &self,
        chain: &[TypeId],
        name: &'static str,
        target: &BindTarget,
    ) -> Option<HandlerDescriptor> {
        let decl = self.metadata.lookup(chain, name)?;
        if !include(decl.role, decl.delegated, decl.field_resolver) {
            tracing::debug!(provider = target.wrapper.token(), method = name, role = %decl.role, "handler excluded");
            return None;
        }

        let callback = match &decl.body {
            MethodBody::Resolve(method) => Callback::Resolve(self.binder.bind(
                target,
                Arc::clone(method),
                Arc::clone(&decl.params),
                self.transform.as_ref(),
            )?),
            MethodBody::Subscribe(method) => {
                let subscribe =
                    self.binder
                        .bind(target, Arc::clone(method), Arc::clone(&decl.params), None)?;
                Callback::Subscription(compose(
                    subscribe,
                    decl.subscription.as_ref(),
                    self.options.request_arg_index,
                ))
            }
        };

        tracing::debug!(
            provider = target.wrapper.token(),
            method = name,
            role = %decl.role,
            request_scoped = target.is_request_scoped,
            "handler bound"
        );
        Some(decl.descriptor(name).with_callback(callback))
    }
}
