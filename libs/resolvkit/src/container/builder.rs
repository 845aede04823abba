use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::provider::{Factory, InstanceWrapper, ModuleRef, ProviderId, ResolveCtx, Scope};
use super::ProviderContainer;
use crate::contracts::ConfigProvider;
use crate::error::ContainerError;
use crate::handler::Instance;
use crate::request::{RequestRegistry, REQUEST};

struct ModuleDraft {
    name: String,
    imports: Vec<String>,
}

struct ProviderDraft {
    token: String,
    module: String,
    type_id: TypeId,
    type_name: &'static str,
    scope: Scope,
    deps: Vec<String>,
    factory: Option<Factory>,
    value: Option<Instance>,
}

/// Collects modules and providers; wiring is validated and ordered at build time.
/// Provider tokens are global and must be unique.
#[derive(Default)]
pub struct ContainerBuilder {
    modules: Vec<ModuleDraft>,
    providers: Vec<ProviderDraft>,
    config: Option<Arc<dyn ConfigProvider>>,
    without_request_registry: bool,
    errors: Vec<String>,
}

impl ContainerBuilder {
    pub fn module(&mut self, name: &str, imports: &[&str]) -> &mut Self {
        if self.modules.iter().any(|m| m.name == name) {
            self.errors
                .push(format!("Module '{name}' is already registered"));
            return self;
        }
        self.modules.push(ModuleDraft {
            name: name.to_string(),
            imports: imports.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// A ready-made shared instance.
    pub fn singleton<T: Any + Send + Sync>(&mut self, module: &str, token: &str, value: T) -> &mut Self {
        self.push(ProviderDraft {
            token: token.to_string(),
            module: module.to_string(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            scope: Scope::Singleton,
            deps: Vec::new(),
            factory: None,
            value: Some(Arc::new(value)),
        })
    }

    /// A provider built by `make` from its declared dependencies.
    pub fn factory<T, F, Fut>(
        &mut self,
        module: &str,
        token: &str,
        scope: Scope,
        deps: &[&str],
        make: F,
    ) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(ResolveCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let factory: Factory =
            Arc::new(move |ctx: ResolveCtx| -> BoxFuture<'static, anyhow::Result<Instance>> {
                let fut = make(ctx);
                Box::pin(async move { fut.await.map(|v| Arc::new(v) as Instance) })
            });
        self.push(ProviderDraft {
            token: token.to_string(),
            module: module.to_string(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            scope,
            deps: deps.iter().map(|s| s.to_string()).collect(),
            factory: Some(factory),
            value: None,
        })
    }

    /// Per-module configuration handed to factories through [`ResolveCtx::config`].
    pub fn with_config(&mut self, config: Arc<dyn ConfigProvider>) -> &mut Self {
        self.config = Some(config);
        self
    }

    /// Build a container without the internal `REQUEST` provider.
    pub fn without_request_registry(&mut self) -> &mut Self {
        self.without_request_registry = true;
        self
    }

    fn push(&mut self, draft: ProviderDraft) -> &mut Self {
        if draft.token == REQUEST {
            self.errors
                .push(format!("Provider token '{REQUEST}' is reserved"));
            return self;
        }
        if self.providers.iter().any(|p| p.token == draft.token) {
            self.errors
                .push(format!("Provider '{}' is already registered", draft.token));
            return self;
        }
        self.providers.push(draft);
        self
    }

    /// Detect cycles in the provider graph using DFS with path tracking.
    fn detect_cycle_with_path(names: &[&str], adj: &[Vec<usize>]) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            node: usize,
            names: &[&str],
            adj: &[Vec<usize>],
            colors: &mut [Color],
            path: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            colors[node] = Color::Gray;
            path.push(node);

            for &next in &adj[node] {
                match colors[next] {
                    Color::Gray => {
                        if let Some(start) = path.iter().position(|&n| n == next) {
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(|&i| names[i].to_string()).collect();
                            cycle.push(names[next].to_string());
                            return Some(cycle);
                        }
                    }
                    Color::White => {
                        if let Some(cycle) = dfs(next, names, adj, colors, path) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }

            path.pop();
            colors[node] = Color::Black;
            None
        }

        let mut colors = vec![Color::White; names.len()];
        let mut path = Vec::new();
        for i in 0..names.len() {
            if colors[i] == Color::White {
                if let Some(cycle) = dfs(i, names, adj, &mut colors, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Validate the wiring and order providers so every dependency precedes its dependents.
    pub fn build(self) -> Result<ProviderContainer, ContainerError> {
        if !self.errors.is_empty() {
            return Err(ContainerError::InvalidConfiguration {
                errors: self.errors,
            });
        }

        // 1) modules, imports and provider owners must be known
        let imports: HashMap<&str, &[String]> = self
            .modules
            .iter()
            .map(|m| (m.name.as_str(), m.imports.as_slice()))
            .collect();
        for m in &self.modules {
            for import in &m.imports {
                if !imports.contains_key(import.as_str()) {
                    return Err(ContainerError::UnknownImport {
                        module: m.name.clone(),
                        import: import.clone(),
                    });
                }
            }
        }
        for p in &self.providers {
            if !imports.contains_key(p.module.as_str()) {
                return Err(ContainerError::UnknownModule(p.module.clone()));
            }
        }

        // 2) provider graph; a dependency must live in the same module or an imported one
        let names: Vec<&str> = self.providers.iter().map(|p| p.token.as_str()).collect();
        let idx: HashMap<&str, usize> = names.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let mut adj = vec![Vec::<usize>::new(); names.len()];

        for (u, p) in self.providers.iter().enumerate() {
            for dep in &p.deps {
                if dep == REQUEST {
                    continue;
                }
                let unknown = || ContainerError::UnknownDependency {
                    provider: p.token.clone(),
                    depends_on: dep.clone(),
                };
                let v = *idx.get(dep.as_str()).ok_or_else(unknown)?;
                let owner = &self.providers[v].module;
                let visible = *owner == p.module
                    || imports
                        .get(p.module.as_str())
                        .is_some_and(|list| list.contains(owner));
                if !visible {
                    return Err(unknown());
                }
                // edge dep -> dependent
                adj[v].push(u);
            }
        }

        // 3) cycles
        if let Some(path) = Self::detect_cycle_with_path(&names, &adj) {
            return Err(ContainerError::CycleDetected { path });
        }

        // 4) Kahn's algorithm (no cycles at this point)
        let mut indeg = vec![0usize; names.len()];
        for targets in &adj {
            for &t in targets {
                indeg[t] += 1;
            }
        }
        let mut q: VecDeque<usize> = (0..names.len()).filter(|&i| indeg[i] == 0).collect();
        let mut order = Vec::with_capacity(names.len());
        while let Some(u) = q.pop_front() {
            order.push(u);
            for &w in &adj[u] {
                indeg[w] -= 1;
                if indeg[w] == 0 {
                    q.push_back(w);
                }
            }
        }

        // 5) freeze
        let wrappers: Vec<Arc<InstanceWrapper>> = self
            .providers
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                Arc::new(InstanceWrapper {
                    id: ProviderId(i),
                    token: p.token,
                    module: p.module,
                    type_id: p.type_id,
                    type_name: p.type_name,
                    scope: p.scope,
                    deps: p.deps,
                    factory: p.factory,
                    instance: OnceCell::new_with(p.value),
                })
            })
            .collect();

        let modules: Vec<Arc<ModuleRef>> = self
            .modules
            .into_iter()
            .map(|m| {
                let providers = wrappers
                    .iter()
                    .filter(|w| w.module == m.name)
                    .cloned()
                    .collect();
                Arc::new(ModuleRef {
                    name: m.name,
                    imports: m.imports,
                    providers,
                })
            })
            .collect();

        let init_order: Vec<Arc<InstanceWrapper>> =
            order.iter().map(|&i| Arc::clone(&wrappers[i])).collect();
        let providers: HashMap<String, Arc<InstanceWrapper>> = wrappers
            .into_iter()
            .map(|w| (w.token.clone(), w))
            .collect();

        let requests = (!self.without_request_registry).then(|| Arc::new(RequestRegistry::new()));

        tracing::info!(
            modules = modules.len(),
            providers = providers.len(),
            request_registry = requests.is_some(),
            "Container wiring resolved"
        );

        Ok(ProviderContainer::from_parts(
            modules,
            providers,
            init_order,
            requests,
            self.config,
        ))
    }
}
