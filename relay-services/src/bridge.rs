//! Bridges classified upstream events into the broadcast hub
//!
//! One registration per known upstream event type; orderbook snapshots and
//! deltas share a handler label so subscribers see a single `orderbook`
//! category.

use std::sync::Arc;

use relay_core::{EventKind, ServerMessage};
use relay_kalshi::EventRouter;

use crate::hub::BroadcastHub;

/// Register the feed-to-hub forwarding handlers on the router
pub async fn register_feed_handlers(hub: &Arc<BroadcastHub>, router: &EventRouter) {
    for kind in EventKind::ALL {
        let hub = Arc::clone(hub);
        let label = kind.downstream_label();
        router
            .register(kind.as_str(), move |data| {
                let hub = Arc::clone(&hub);
                Box::pin(async move {
                    if let Some(message) = ServerMessage::event(label, data) {
                        hub.broadcast(message).await;
                    }
                    Ok(())
                })
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::{RelayError, RelayResult};
    use relay_kalshi::{
        AuthHeaders, FeedCredentials, FeedTransport, FrameSink, FrameStream, Signer,
        UpstreamClient,
    };
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct OfflineTransport;

    #[async_trait]
    impl FeedTransport for OfflineTransport {
        async fn connect(
            &self,
            _auth: &AuthHeaders,
        ) -> RelayResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
            Err(RelayError::transport("offline"))
        }
    }

    async fn bridge_fixture() -> (Arc<BroadcastHub>, Arc<EventRouter>) {
        let signer = Signer::new(FeedCredentials {
            key_id: "key-1".to_string(),
            secret: "test-secret".to_string(),
        })
        .unwrap();
        let router = Arc::new(EventRouter::new());
        let upstream = Arc::new(UpstreamClient::new(
            signer,
            OfflineTransport,
            Arc::clone(&router),
        ));
        let hub = Arc::new(BroadcastHub::with_delivery_timeout(
            upstream,
            Duration::from_secs(1),
        ));
        register_feed_handlers(&hub, &router).await;
        (hub, router)
    }

    #[tokio::test]
    async fn registers_a_handler_for_every_known_event_type() {
        let (_hub, router) = bridge_fixture().await;
        for kind in EventKind::ALL {
            assert_eq!(router.handler_count(kind.as_str()).await, 1, "{}", kind);
        }
    }

    #[tokio::test]
    async fn snapshot_and_delta_both_broadcast_as_orderbook() {
        let (hub, router) = bridge_fixture().await;
        let (tx, mut rx) = mpsc::channel(8);
        hub.join(tx);

        router
            .dispatch("orderbook_snapshot", json!({"market_ticker": "ABC"}))
            .await;
        router
            .dispatch("orderbook_delta", json!({"market_ticker": "ABC", "delta": 3}))
            .await;

        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::Orderbook { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::Orderbook { .. })
        ));
    }

    #[tokio::test]
    async fn ticker_events_keep_their_payload() {
        let (hub, router) = bridge_fixture().await;
        let (tx, mut rx) = mpsc::channel(8);
        hub.join(tx);

        let payload = json!({"market_ticker": "ABC", "price": 55});
        router.dispatch("ticker", payload.clone()).await;

        match rx.recv().await {
            Some(ServerMessage::Ticker { data }) => assert_eq!(data, payload),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
