//! Raw invocation arguments and the parameter decoding pipeline.
//!
//! The dispatch layer calls a bound handler with positional arguments, conventionally
//! `(parent, args, context, info)`. Each handler declares the parameters it wants through
//! a list of [`ParamSpec`]s; a [`ParamsFactory`] maps every spec to a raw argument and the
//! result reaches the handler body as [`Params`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::request::{ContextId, RequestValue};

pub const ROOT_INDEX: usize = 0;
pub const ARGS_INDEX: usize = 1;
pub const CONTEXT_INDEX: usize = 2;
pub const INFO_INDEX: usize = 3;

/// One positional argument: plain JSON data or an opaque object (e.g. a request context).
#[derive(Clone)]
pub enum RawArg {
    Value(Value),
    Object(Arc<dyn Any + Send + Sync>),
}

impl RawArg {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        RawArg::Object(Arc::new(value))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RawArg::Value(v) => Some(v),
            RawArg::Object(_) => None,
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            RawArg::Object(o) => Arc::clone(o).downcast::<T>().ok(),
            RawArg::Value(_) => None,
        }
    }

    /// The value registered as the request object for request-scoped construction.
    pub fn to_request_value(&self) -> RequestValue {
        match self {
            RawArg::Value(v) => Arc::new(v.clone()),
            RawArg::Object(o) => Arc::clone(o),
        }
    }
}

impl fmt::Debug for RawArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawArg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            RawArg::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<Value> for RawArg {
    fn from(v: Value) -> Self {
        RawArg::Value(v)
    }
}

/// Positional arguments of one invocation, plus the request identifier once the
/// logical request has been assigned one.
#[derive(Clone, Debug, Default)]
pub struct RawArgs {
    values: Vec<RawArg>,
    context_id: Option<ContextId>,
}

impl RawArgs {
    pub fn new(values: Vec<RawArg>) -> Self {
        Self {
            values,
            context_id: None,
        }
    }

    /// Conventional resolver call shape.
    pub fn resolver(parent: Value, args: Value, context: RawArg, info: Value) -> Self {
        Self::new(vec![
            RawArg::Value(parent),
            RawArg::Value(args),
            context,
            RawArg::Value(info),
        ])
    }

    /// Tag the arguments with the identifier of the logical request they belong to.
    /// Every request-scoped handler invoked with these arguments shares one instance tree.
    pub fn with_context_id(mut self, id: ContextId) -> Self {
        self.context_id = Some(id);
        self
    }

    pub fn context_id(&self) -> Option<ContextId> {
        self.context_id
    }

    pub fn get(&self, index: usize) -> Option<&RawArg> {
        self.values.get(index)
    }

    /// The GraphQL `args` object, if present and JSON.
    pub fn args(&self) -> Option<&Value> {
        self.get(ARGS_INDEX).and_then(RawArg::as_value)
    }

    pub fn values(&self) -> &[RawArg] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Declared parameter of a handler method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamSpec {
    Root,
    Args,
    /// A single named field of the `args` object.
    Arg(&'static str),
    Context,
    Info,
}

/// Decoded parameters handed to a handler body, in declaration order.
#[derive(Clone, Debug)]
pub struct Params {
    values: Vec<RawArg>,
    context_id: Option<ContextId>,
}

impl Params {
    pub fn new(values: Vec<RawArg>, context_id: Option<ContextId>) -> Self {
        Self { values, context_id }
    }

    pub fn raw(&self, index: usize) -> Option<&RawArg> {
        self.values.get(index)
    }

    /// Deserialize the JSON parameter at `index`.
    pub fn value<T: DeserializeOwned>(&self, index: usize) -> Result<T, ResolveError> {
        match self.raw(index) {
            Some(RawArg::Value(v)) => serde_json::from_value(v.clone())
                .map_err(|source| ResolveError::DecodeParam { index, source }),
            Some(RawArg::Object(_)) => Err(ResolveError::ParamType {
                index,
                expected: std::any::type_name::<T>(),
            }),
            None => Err(ResolveError::MissingParam { index }),
        }
    }

    /// Borrow the object parameter at `index` as `T`.
    pub fn object<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, ResolveError> {
        let raw = self
            .raw(index)
            .ok_or(ResolveError::MissingParam { index })?;
        raw.downcast::<T>().ok_or(ResolveError::ParamType {
            index,
            expected: std::any::type_name::<T>(),
        })
    }

    /// Identifier of the request this invocation runs in, if it is request-scoped.
    pub fn context_id(&self) -> Option<ContextId> {
        self.context_id
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Maps a declared parameter to the raw argument that feeds it.
pub trait ParamsFactory: Send + Sync {
    fn exchange(&self, spec: &ParamSpec, raw: &RawArgs) -> Option<RawArg>;
}

/// Parameter factory for the `(parent, args, context, info)` calling convention.
#[derive(Clone, Copy, Debug, Default)]
pub struct GqlParamsFactory;

impl ParamsFactory for GqlParamsFactory {
    fn exchange(&self, spec: &ParamSpec, raw: &RawArgs) -> Option<RawArg> {
        match spec {
            ParamSpec::Root => raw.get(ROOT_INDEX).cloned(),
            ParamSpec::Args => raw.get(ARGS_INDEX).cloned(),
            ParamSpec::Arg(name) => raw
                .args()
                .map(|args| RawArg::Value(args.get(*name).cloned().unwrap_or(Value::Null))),
            ParamSpec::Context => raw.get(CONTEXT_INDEX).cloned(),
            ParamSpec::Info => raw.get(INFO_INDEX).cloned(),
        }
    }
}

/// Decode `raw` into the parameters described by `specs`.
///
/// An empty spec list passes every raw argument through unchanged; a spec with no
/// matching raw argument decodes to JSON `null`.
pub fn decode(
    factory: &dyn ParamsFactory,
    specs: &[ParamSpec],
    raw: &RawArgs,
    context_id: Option<ContextId>,
) -> Params {
    if specs.is_empty() {
        return Params::new(raw.values().to_vec(), context_id);
    }
    let values = specs
        .iter()
        .map(|spec| {
            factory
                .exchange(spec, raw)
                .unwrap_or(RawArg::Value(Value::Null))
        })
        .collect();
    Params::new(values, context_id)
}
