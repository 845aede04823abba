//! Handler metadata table.
//!
//! Resolver types declare their handler methods explicitly with [`ResolverDecl`]; the
//! declarations are collected into a [`MetadataTableBuilder`] either directly or through
//! `inventory`-submitted [`ResolverRegistrator`]s, and frozen into a [`MetadataTable`]
//! keyed by `(TypeId, method name)`.

pub mod scanner;

use futures::future::{self, BoxFuture};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::descriptor::{HandlerDescriptor, HandlerRole};
use crate::error::{ExploreError, ResolveError};
use crate::handler::{EventFilter, EventStream, Instance, Method, MethodBody, PayloadResolver};
use crate::params::{ParamSpec, Params, RawArg, RawArgs};

pub use scanner::scan_methods;

/// Optional hooks declared with a subscription handler.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    pub(crate) resolve: Option<PayloadResolver>,
    pub(crate) filter: Option<EventFilter>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape each payload before delivery.
    pub fn resolve<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, &RawArgs) -> Result<Value, ResolveError> + Send + Sync + 'static,
    {
        self.resolve = Some(Arc::new(f));
        self
    }

    /// Gate delivery with a `(payload, args, context)` predicate.
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Value, Option<&RawArg>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn has_resolve(&self) -> bool {
        self.resolve.is_some()
    }
}

/// Projects an instance of a derived resolver type onto one of its bases.
pub type Upcast = Arc<dyn Fn(Instance) -> Result<Instance, ResolveError> + Send + Sync>;

/// Declared metadata of one handler method.
#[derive(Clone)]
pub struct HandlerDecl {
    pub role: HandlerRole,
    pub delegated: bool,
    /// Plain field resolver of an object type (as opposed to a root operation).
    pub field_resolver: bool,
    pub field_name: Option<String>,
    pub parent_type: Option<&'static str>,
    pub params: Arc<[ParamSpec]>,
    pub subscription: Option<SubscriptionOptions>,
    pub body: MethodBody,
}

impl HandlerDecl {
    pub fn new(role: HandlerRole, body: MethodBody) -> Self {
        Self {
            role,
            delegated: false,
            field_resolver: false,
            field_name: None,
            parent_type: None,
            params: Arc::from(Vec::new()),
            subscription: None,
            body,
        }
    }

    /// Subscriptions must produce streams and nothing else may.
    pub fn is_well_formed(&self) -> bool {
        let is_subscription = self.role == HandlerRole::Subscription;
        is_subscription == self.body.is_subscribe()
            && (is_subscription || self.subscription.is_none())
    }

    /// The same handler with its body run against the projection of the bound instance.
    fn rebased(&self, upcast: &Upcast) -> Self {
        let mut decl = self.clone();
        decl.body = match &self.body {
            MethodBody::Resolve(m) => MethodBody::Resolve(rebase(Arc::clone(m), Arc::clone(upcast))),
            MethodBody::Subscribe(m) => {
                MethodBody::Subscribe(rebase(Arc::clone(m), Arc::clone(upcast)))
            }
        };
        decl
    }

    pub fn descriptor(&self, method_name: &'static str) -> HandlerDescriptor {
        HandlerDescriptor::new(self.role, method_name, self.delegated)
            .with_field_name(self.field_name.as_deref().unwrap_or(method_name))
            .with_parent_type(self.parent_type)
    }
}

/// A method of a resolver type; `handler` is `None` for ordinary methods.
#[derive(Clone)]
pub struct MethodDecl {
    pub name: &'static str,
    pub handler: Option<HandlerDecl>,
}

/// All declarations of one resolver type.
#[derive(Clone)]
pub struct TypeDecl {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub extends: Vec<(TypeId, Upcast)>,
    pub methods: Vec<MethodDecl>,
}

impl TypeDecl {
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Typed builder for the declarations of resolver type `T`.
///
/// Modifiers (`delegated`, `name`, `params`) apply to the most recently declared handler.
pub struct ResolverDecl<T> {
    type_name: &'static str,
    extends: Vec<(TypeId, Upcast)>,
    methods: Vec<MethodDecl>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ResolverDecl<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            extends: Vec::new(),
            methods: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Inherit the declarations of `B`; own declarations shadow inherited ones by name.
    ///
    /// Inherited handlers run against `project(&this)`, the `B` part of the bound instance.
    pub fn extends<B, F>(mut self, project: F) -> Self
    where
        B: Any + Send + Sync,
        F: Fn(&T) -> Arc<B> + Send + Sync + 'static,
    {
        let type_name = self.type_name;
        let upcast: Upcast = Arc::new(move |instance: Instance| {
            instance
                .downcast::<T>()
                .map(|this| project(this.as_ref()) as Instance)
                .map_err(|_| ResolveError::InstanceType {
                    expected: type_name,
                })
        });
        self.extends.push((TypeId::of::<B>(), upcast));
        self
    }

    /// An ordinary method carrying no handler metadata.
    pub fn method(mut self, name: &'static str) -> Self {
        self.methods.push(MethodDecl {
            name,
            handler: None,
        });
        self
    }

    pub fn query<F, Fut>(self, name: &'static str, body: F) -> Self
    where
        F: Fn(Arc<T>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResolveError>> + Send + 'static,
    {
        let body = MethodBody::Resolve(erase::<T, _, _, _>(self.type_name, body));
        self.handler(name, HandlerRole::Query, body)
    }

    pub fn mutation<F, Fut>(self, name: &'static str, body: F) -> Self
    where
        F: Fn(Arc<T>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResolveError>> + Send + 'static,
    {
        let body = MethodBody::Resolve(erase::<T, _, _, _>(self.type_name, body));
        self.handler(name, HandlerRole::Mutation, body)
    }

    pub fn subscription<F, Fut>(
        mut self,
        name: &'static str,
        options: SubscriptionOptions,
        body: F,
    ) -> Self
    where
        F: Fn(Arc<T>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<EventStream, ResolveError>> + Send + 'static,
    {
        let body = MethodBody::Subscribe(erase::<T, _, _, _>(self.type_name, body));
        self = self.handler(name, HandlerRole::Subscription, body);
        if let Some(h) = self.last_handler_mut() {
            h.subscription = Some(options);
        }
        self
    }

    /// Field resolver registered on the `parent` object type by this engine.
    pub fn resolve_field<F, Fut>(mut self, parent: &'static str, name: &'static str, body: F) -> Self
    where
        F: Fn(Arc<T>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResolveError>> + Send + 'static,
    {
        let body = MethodBody::Resolve(erase::<T, _, _, _>(self.type_name, body));
        self = self.handler(name, HandlerRole::FieldResolver, body);
        if let Some(h) = self.last_handler_mut() {
            h.parent_type = Some(parent);
        }
        self
    }

    /// Plain field resolver; the schema layer wires it directly, so discovery skips it
    /// unless it is also marked delegated.
    pub fn field<F, Fut>(mut self, name: &'static str, body: F) -> Self
    where
        F: Fn(Arc<T>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ResolveError>> + Send + 'static,
    {
        let body = MethodBody::Resolve(erase::<T, _, _, _>(self.type_name, body));
        self = self.handler(name, HandlerRole::FieldResolver, body);
        if let Some(h) = self.last_handler_mut() {
            h.field_resolver = true;
        }
        self
    }

    /// Declare a handler with an explicit role and an already erased body.
    pub fn handler(mut self, name: &'static str, role: HandlerRole, body: MethodBody) -> Self {
        self.methods.push(MethodDecl {
            name,
            handler: Some(HandlerDecl::new(role, body)),
        });
        self
    }

    /// Mark the last handler as forwarding to another type.
    pub fn delegated(mut self) -> Self {
        if let Some(h) = self.last_handler_mut() {
            h.delegated = true;
        }
        self
    }

    /// Expose the last handler under a schema name different from the method name.
    pub fn name(mut self, field_name: impl Into<String>) -> Self {
        if let Some(h) = self.last_handler_mut() {
            h.field_name = Some(field_name.into());
        }
        self
    }

    pub fn params(mut self, specs: impl IntoIterator<Item = ParamSpec>) -> Self {
        if let Some(h) = self.last_handler_mut() {
            h.params = specs.into_iter().collect::<Vec<_>>().into();
        }
        self
    }

    fn last_handler_mut(&mut self) -> Option<&mut HandlerDecl> {
        self.methods.last_mut().and_then(|m| m.handler.as_mut())
    }

    fn into_type_decl(self) -> TypeDecl {
        TypeDecl {
            type_id: TypeId::of::<T>(),
            type_name: self.type_name,
            extends: self.extends,
            methods: self.methods,
        }
    }
}

/// Wrap a typed body into a [`Method`] that downcasts the instance first.
fn erase<T, O, F, Fut>(type_name: &'static str, body: F) -> Method<O>
where
    T: Any + Send + Sync,
    O: Send + 'static,
    F: Fn(Arc<T>, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ResolveError>> + Send + 'static,
{
    Arc::new(move |instance: Instance, params: Params| -> BoxFuture<'static, Result<O, ResolveError>> {
        let call = instance.downcast::<T>().map(|this| body(this, params));
        Box::pin(async move {
            match call {
                Ok(fut) => fut.await,
                Err(_) => Err(ResolveError::InstanceType {
                    expected: type_name,
                }),
            }
        })
    })
}

/// Run `method` against the projection of whatever instance it is called with.
fn rebase<O: Send + 'static>(method: Method<O>, upcast: Upcast) -> Method<O> {
    Arc::new(move |instance: Instance, params: Params| -> BoxFuture<'static, Result<O, ResolveError>> {
        match upcast(instance) {
            Ok(base) => method(base, params),
            Err(e) => Box::pin(future::ready(Err(e))),
        }
    })
}

/// The function type submitted via `inventory::submit!`.
pub struct ResolverRegistrator(pub fn(&mut MetadataTableBuilder));

inventory::collect!(ResolverRegistrator);

/// Collects resolver declarations; uniqueness and base types are checked at build time.
#[derive(Default)]
pub struct MetadataTableBuilder {
    types: HashMap<TypeId, TypeDecl>,
    errors: Vec<String>,
}

impl MetadataTableBuilder {
    pub fn register<T: Any + Send + Sync>(&mut self, decl: ResolverDecl<T>) -> &mut Self {
        let decl = decl.into_type_decl();
        if let Some(existing) = self.types.get(&decl.type_id) {
            self.errors.push(format!(
                "Resolver type '{}' is already registered",
                existing.type_name
            ));
            return self;
        }
        let mut seen = HashSet::new();
        for m in &decl.methods {
            if !seen.insert(m.name) {
                self.errors.push(format!(
                    "Method '{}' is declared twice on '{}'",
                    m.name, decl.type_name
                ));
            }
        }
        self.types.insert(decl.type_id, decl);
        self
    }

    pub fn build(self) -> Result<MetadataTable, ExploreError> {
        let mut errors = self.errors;
        for decl in self.types.values() {
            for (base, _) in &decl.extends {
                if !self.types.contains_key(base) {
                    errors.push(format!(
                        "Resolver type '{}' extends an unregistered type",
                        decl.type_name
                    ));
                }
            }
        }
        if !errors.is_empty() {
            return Err(ExploreError::InvalidMetadata { errors });
        }
        Ok(MetadataTable { types: self.types })
    }
}

/// Frozen registration table: `(type, method) -> handler metadata`.
pub struct MetadataTable {
    types: HashMap<TypeId, TypeDecl>,
}

impl std::fmt::Debug for MetadataTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&'static str> = self.types.values().map(|t| t.type_name).collect();
        names.sort_unstable();
        f.debug_struct("MetadataTable")
            .field("types", &names)
            .finish()
    }
}

impl MetadataTable {
    /// Discover via inventory, have registrators fill the builder, then build.
    pub fn discover_and_build() -> Result<Self, ExploreError> {
        let mut b = MetadataTableBuilder::default();
        for r in ::inventory::iter::<ResolverRegistrator> {
            r.0(&mut b);
        }
        b.build()
    }

    pub fn type_decl(&self, ty: TypeId) -> Option<&TypeDecl> {
        self.types.get(&ty)
    }

    pub fn type_name(&self, ty: TypeId) -> Option<&'static str> {
        self.types.get(&ty).map(|t| t.type_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Inheritance chain of `ty`: the type itself, then its bases depth-first.
    /// Unregistered types yield an empty chain.
    pub fn chain(&self, ty: TypeId) -> Vec<TypeId> {
        fn walk(table: &MetadataTable, ty: TypeId, out: &mut Vec<TypeId>) {
            if out.contains(&ty) {
                return;
            }
            let Some(decl) = table.types.get(&ty) else {
                return;
            };
            out.push(ty);
            for (base, _) in &decl.extends {
                walk(table, *base, out);
            }
        }

        let mut out = Vec::new();
        walk(self, ty, &mut out);
        out
    }

    /// Handler metadata of `method`, resolved along `chain`.
    ///
    /// The first type in the chain that declares `method` decides: an overriding
    /// declaration without metadata hides an inherited handler. Malformed metadata
    /// is treated as "not a handler". An inherited handler comes back rebased so it
    /// can be bound to an instance of `chain[0]`.
    pub fn lookup(&self, chain: &[TypeId], method: &str) -> Option<HandlerDecl> {
        let (owner, decl) = chain
            .iter()
            .filter_map(|ty| self.types.get(ty))
            .find_map(|t| t.method(method).map(|m| (t.type_id, m)))?;
        let handler = decl.handler.as_ref()?;
        if !handler.is_well_formed() {
            tracing::debug!(method, role = %handler.role, "ignoring malformed handler metadata");
            return None;
        }
        match chain.first().and_then(|&own| self.upcast(own, owner)) {
            Some(upcast) => Some(handler.rebased(&upcast)),
            None => Some(handler.clone()),
        }
    }

    /// Projection from `from` onto its ancestor `to` along the first `extends` path;
    /// `None` when the types are the same.
    fn upcast(&self, from: TypeId, to: TypeId) -> Option<Upcast> {
        fn path(
            table: &MetadataTable,
            from: TypeId,
            to: TypeId,
            seen: &mut Vec<TypeId>,
        ) -> Option<Vec<Upcast>> {
            if from == to {
                return Some(Vec::new());
            }
            if seen.contains(&from) {
                return None;
            }
            seen.push(from);
            for (base, step) in &table.types.get(&from)?.extends {
                if let Some(mut rest) = path(table, *base, to, seen) {
                    rest.insert(0, Arc::clone(step));
                    return Some(rest);
                }
            }
            None
        }

        let steps = path(self, from, to, &mut Vec::new())?;
        if steps.is_empty() {
            return None;
        }
        Some(Arc::new(move |instance: Instance| {
            steps.iter().try_fold(instance, |acc, step| step(acc))
        }))
    }

    /// Descriptor of `method` with role, delegation flag and names populated and no callback.
    pub fn extract(&self, chain: &[TypeId], method: &'static str) -> Option<HandlerDescriptor> {
        self.lookup(chain, method).map(|h| h.descriptor(method))
    }
}
