//! Event router: string-typed dispatch into registered handlers
//!
//! Inbound frames are classified by their `type` field and dispatched to
//! every handler registered for that type, in registration order. Handler
//! failures are isolated: one failing handler neither stops the others nor
//! reaches the receive loop. An unrecognized type is a silent no-op: the
//! feed may carry event types this consumer does not care about.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{trace, warn};

/// A registered event handler
///
/// Handlers receive the event payload (the inbound frame minus its `type`
/// tag) and report failures through the returned result; errors are logged
/// by the router and never propagate.
pub type Handler = Box<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Maps event-type strings to ordered handler sequences
pub struct EventRouter {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Append a handler for an event type
    ///
    /// Registering the same handler twice is allowed and causes double
    /// invocation; deduplication is the caller's responsibility.
    pub async fn register<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.into())
            .or_default()
            .push(Box::new(handler));
    }

    /// Invoke all handlers registered for `event_type`, in order
    pub async fn dispatch(&self, event_type: &str, payload: Value) {
        let handlers = self.handlers.read().await;
        let Some(registered) = handlers.get(event_type) else {
            trace!("no handlers for event type '{}'", event_type);
            return;
        };

        for (index, handler) in registered.iter().enumerate() {
            if let Err(e) = handler(payload.clone()).await {
                warn!("handler {} for '{}' failed: {:#}", index, event_type, e);
            }
        }
    }

    /// Number of handlers registered for an event type
    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex;

    #[tokio::test]
    async fn dispatches_in_registration_order() {
        let router = EventRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            router
                .register("trade", move |_payload| {
                    let order = Arc::clone(&order);
                    Box::pin(async move {
                        order.lock().unwrap().push(tag);
                        Ok(())
                    })
                })
                .await;
        }

        router.dispatch("trade", json!({})).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_later_handlers() {
        let router = EventRouter::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        router
            .register("trade", |_payload| {
                Box::pin(async { Err(anyhow::anyhow!("handler exploded")) })
            })
            .await;

        let invocations_clone = Arc::clone(&invocations);
        router
            .register("trade", move |_payload| {
                let invocations = Arc::clone(&invocations_clone);
                Box::pin(async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await;

        router.dispatch("trade", json!({"price": 55})).await;
        router.dispatch("trade", json!({"price": 56})).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_type_is_a_silent_noop() {
        let router = EventRouter::new();
        // Must not panic or error
        router.dispatch("market_lifecycle", json!({})).await;
        assert_eq!(router.handler_count("market_lifecycle").await, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_invokes_twice() {
        let router = EventRouter::new();
        let invocations = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let invocations = Arc::clone(&invocations);
            router
                .register("ticker", move |_payload| {
                    let invocations = Arc::clone(&invocations);
                    Box::pin(async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
                .await;
        }

        router.dispatch("ticker", json!({})).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }
}
