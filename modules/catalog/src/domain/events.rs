use futures::future;
use futures::stream::StreamExt;
use resolvkit::EventStream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

use super::store::Book;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookEvent {
    Added { book: Book },
}

/// Fan-out of catalog changes to live subscriptions.
#[derive(Debug)]
pub struct BookEvents {
    tx: broadcast::Sender<Value>,
}

impl BookEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: &BookEvent) -> usize {
        let payload = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping unserializable book event");
                return 0;
            }
        };
        // Err only means nobody is listening.
        let delivered = self.tx.send(payload).unwrap_or(0);
        trace!(delivered, "book event published");
        delivered
    }

    /// A stream of every event published after this call.
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| {
                future::ready(match item {
                    Ok(payload) => Some(payload),
                    Err(lagged) => {
                        warn!(error = %lagged, "book subscriber lagged");
                        None
                    }
                })
            })
            .boxed()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}
