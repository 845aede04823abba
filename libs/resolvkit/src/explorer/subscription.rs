use futures::future::{self, BoxFuture};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::handler::{EventStream, Invocable, SubscriptionCallback};
use crate::metadata::SubscriptionOptions;
use crate::params::RawArgs;

/// Pair a bound subscription producer with its declared hooks.
///
/// Without a filter the producer is returned as is. With one, each activation calls the
/// producer exactly once and gates its events with `filter(payload, args, context)`,
/// where `context` is the raw argument at `context_index`. Payloads pass through untouched.
pub fn compose(
    subscribe: Invocable<EventStream>,
    options: Option<&SubscriptionOptions>,
    context_index: usize,
) -> SubscriptionCallback {
    let resolve = options.and_then(|o| o.resolve.clone());
    let Some(filter) = options.and_then(|o| o.filter.clone()) else {
        return SubscriptionCallback { resolve, subscribe };
    };

    let filtered: Invocable<EventStream> = Arc::new(
        move |raw: RawArgs| -> BoxFuture<'static, Result<EventStream, ResolveError>> {
            let subscribe = Arc::clone(&subscribe);
            let filter = Arc::clone(&filter);
            Box::pin(async move {
                let args = raw.args().cloned().unwrap_or(Value::Null);
                let context = raw.get(context_index).cloned();
                let events = subscribe(raw).await?;
                Ok(events
                    .filter(move |payload| future::ready(filter(payload, &args, context.as_ref())))
                    .boxed())
            })
        },
    );

    SubscriptionCallback {
        resolve,
        subscribe: filtered,
    }
}
