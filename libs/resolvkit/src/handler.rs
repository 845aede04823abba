//! Callable shapes shared by the metadata table, the binder and the schema layer.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::params::{Params, RawArg, RawArgs};

/// A type-erased provider instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Async stream of subscription payloads.
pub type EventStream = BoxStream<'static, Value>;

/// An unbound handler method: receives the instance it runs against and its decoded params.
pub type Method<O> =
    Arc<dyn Fn(Instance, Params) -> BoxFuture<'static, Result<O, ResolveError>> + Send + Sync>;

/// A dispatch-ready callable: receives raw positional arguments.
pub type Invocable<O> =
    Arc<dyn Fn(RawArgs) -> BoxFuture<'static, Result<O, ResolveError>> + Send + Sync>;

/// Optional rewrite applied to a method right before it is bound.
pub type MethodTransform<O> = Arc<dyn Fn(Method<O>) -> Method<O> + Send + Sync>;

/// Custom payload shaping for subscription events.
pub type PayloadResolver =
    Arc<dyn Fn(Value, &RawArgs) -> Result<Value, ResolveError> + Send + Sync>;

/// Delivery predicate for subscription events: `(payload, args, context)`.
pub type EventFilter =
    Arc<dyn Fn(&Value, &Value, Option<&RawArg>) -> bool + Send + Sync>;

/// Declared body of a handler method.
#[derive(Clone)]
pub enum MethodBody {
    Resolve(Method<Value>),
    Subscribe(Method<EventStream>),
}

impl MethodBody {
    pub fn is_subscribe(&self) -> bool {
        matches!(self, MethodBody::Subscribe(_))
    }
}

/// The `{resolve, subscribe}` pair exposed for a subscription handler.
#[derive(Clone)]
pub struct SubscriptionCallback {
    pub resolve: Option<PayloadResolver>,
    pub subscribe: Invocable<EventStream>,
}

/// Callback attached to a descriptor once it is bound.
#[derive(Clone)]
pub enum Callback {
    Resolve(Invocable<Value>),
    Subscription(SubscriptionCallback),
}

impl Callback {
    pub fn as_resolve(&self) -> Option<&Invocable<Value>> {
        match self {
            Callback::Resolve(f) => Some(f),
            Callback::Subscription(_) => None,
        }
    }

    pub fn as_subscription(&self) -> Option<&SubscriptionCallback> {
        match self {
            Callback::Subscription(s) => Some(s),
            Callback::Resolve(_) => None,
        }
    }
}
