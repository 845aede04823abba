use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::scope::{ContextGuard, ScopeResolver};
use crate::container::{InstanceWrapper, ModuleRef};
use crate::error::ResolveError;
use crate::external_context::ExternalContextCreator;
use crate::handler::{EventStream, Instance, Invocable, Method, MethodTransform};
use crate::params::{ParamSpec, RawArgs};
use crate::request::{ContextId, RequestRegistry};

/// Handler output that can keep a minted request context alive for as long as it needs it.
pub trait RequestScoped: Send + 'static {
    fn hold(self, guard: ContextGuard) -> Self;
}

impl RequestScoped for Value {
    fn hold(self, guard: ContextGuard) -> Self {
        drop(guard);
        self
    }
}

impl RequestScoped for EventStream {
    fn hold(self, guard: ContextGuard) -> Self {
        Guarded {
            inner: self,
            _guard: guard,
        }
        .boxed()
    }
}

/// An event stream that owns the context its producer was built in.
struct Guarded {
    inner: EventStream,
    _guard: ContextGuard,
}

impl Stream for Guarded {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// The provider a handler belongs to, captured once per provider during discovery.
#[derive(Clone, Debug)]
pub struct BindTarget {
    /// Live shared instance; `None` for request-scoped templates that were never built.
    pub instance: Option<Instance>,
    pub wrapper: Arc<InstanceWrapper>,
    pub module: Arc<ModuleRef>,
    pub is_request_scoped: bool,
}

/// Wraps handler methods into invocables bound to the right instance.
pub struct ContextBinder {
    scopes: Arc<ScopeResolver>,
    creator: ExternalContextCreator,
    requests: Option<Arc<RequestRegistry>>,
    request_arg_index: usize,
}

impl ContextBinder {
    pub fn new(
        scopes: Arc<ScopeResolver>,
        creator: ExternalContextCreator,
        requests: Option<Arc<RequestRegistry>>,
        request_arg_index: usize,
    ) -> Self {
        Self {
            scopes,
            creator,
            requests,
            request_arg_index,
        }
    }

    /// Bind `method` for dispatch.
    ///
    /// Static targets are bound to their shared instance once; `None` is returned when
    /// such a target has no instance. Request-scoped targets get an invocable that builds
    /// (or reuses) the request's instance tree on every call before running the handler.
    ///
    /// A context the caller stamped stays alive until the caller disposes it. A context
    /// minted here is disposed once the handler's output is released: a value when the
    /// call returns, an event stream when the stream is dropped.
    pub fn bind<O: RequestScoped>(
        &self,
        target: &BindTarget,
        method: Method<O>,
        params: Arc<[ParamSpec]>,
        transform: Option<&MethodTransform<O>>,
    ) -> Option<Invocable<O>> {
        let method = match transform {
            Some(t) => t(method),
            None => method,
        };

        if !target.is_request_scoped {
            let instance = target.instance.clone()?;
            return Some(self.creator.create(instance, method, params, None));
        }

        let scopes = Arc::clone(&self.scopes);
        let creator = self.creator.clone();
        let requests = self.requests.clone();
        let index = self.request_arg_index;
        let wrapper = Arc::clone(&target.wrapper);
        let module = Arc::clone(&target.module);

        Some(Arc::new(
            move |raw: RawArgs| -> BoxFuture<'static, Result<O, ResolveError>> {
                let scopes = Arc::clone(&scopes);
                let creator = creator.clone();
                let requests = requests.clone();
                let wrapper = Arc::clone(&wrapper);
                let module = Arc::clone(&module);
                let method = Arc::clone(&method);
                let params = Arc::clone(&params);

                Box::pin(async move {
                    // One id per logical request: reuse the one the dispatcher stamped.
                    let (context_id, guard) = match raw.context_id() {
                        Some(id) => (id, None),
                        None => {
                            let id = ContextId::new();
                            (id, Some(ContextGuard::new(Arc::clone(&scopes), id)))
                        }
                    };

                    let request = raw
                        .get(index)
                        .ok_or(ResolveError::MissingRequestArg { index })?;
                    match &requests {
                        Some(registry) => {
                            if !registry.register(context_id, request.to_request_value()) {
                                tracing::trace!(context = %context_id, "request object already registered");
                            }
                        }
                        None => {
                            tracing::debug!(
                                provider = wrapper.token(),
                                "no request registry in container; request object not registered"
                            );
                        }
                    }

                    let instance = scopes
                        .instantiate_per_request(&wrapper, &module, context_id)
                        .await?;
                    let bound = creator.create(instance, method, params, Some(context_id));
                    let out = bound(raw.with_context_id(context_id)).await?;
                    Ok(match guard {
                        Some(guard) => out.hold(guard),
                        None => out,
                    })
                })
            },
        ))
    }
}
