use std::sync::Arc;

use crate::handler::{Instance, Invocable, Method};
use crate::params::{decode, GqlParamsFactory, ParamSpec, ParamsFactory, RawArgs};
use crate::request::ContextId;

/// Turns a method bound to an instance into a dispatch-ready invocable that decodes raw
/// arguments into the handler's declared parameters first.
#[derive(Clone)]
pub struct ExternalContextCreator {
    factory: Arc<dyn ParamsFactory>,
}

impl Default for ExternalContextCreator {
    fn default() -> Self {
        Self::new(Arc::new(GqlParamsFactory))
    }
}

impl ExternalContextCreator {
    pub fn new(factory: Arc<dyn ParamsFactory>) -> Self {
        Self { factory }
    }

    /// Bind `method` to `instance`.
    ///
    /// `context_id` is forwarded to the handler through [`crate::Params::context_id`];
    /// when it is `None` the identifier carried by the raw arguments (if any) is used.
    pub fn create<O: Send + 'static>(
        &self,
        instance: Instance,
        method: Method<O>,
        params: Arc<[ParamSpec]>,
        context_id: Option<ContextId>,
    ) -> Invocable<O> {
        let factory = Arc::clone(&self.factory);
        Arc::new(move |raw: RawArgs| {
            let ctx = context_id.or_else(|| raw.context_id());
            let decoded = decode(factory.as_ref(), &params, &raw, ctx);
            method(Arc::clone(&instance), decoded)
        })
    }
}
