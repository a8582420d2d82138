//! Broadcast hub for downstream subscribers
//!
//! Tracks the set of live subscriber connections, fans classified events
//! out to all of them, and prunes dead or unresponsive subscribers without
//! blocking healthy ones. Also translates per-subscriber subscribe and
//! unsubscribe requests into upstream subscription changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_core::{RelayResult, ServerMessage};
use relay_kalshi::{ConnectionState, UpstreamClient};

/// Default bound on each subscriber's delivery attempt
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Unique identifier for a downstream subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Fan-out hub for all downstream subscribers
pub struct BroadcastHub {
    /// Live subscribers; the lock is never held across an await
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<ServerMessage>>>,
    next_id: AtomicU64,
    upstream: Arc<UpstreamClient>,
    delivery_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self::with_delivery_timeout(upstream, DEFAULT_DELIVERY_TIMEOUT)
    }

    pub fn with_delivery_timeout(upstream: Arc<UpstreamClient>, delivery_timeout: Duration) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            upstream,
            delivery_timeout,
        }
    }

    /// Add a subscriber; events are delivered through its channel
    pub fn join(&self, tx: mpsc::Sender<ServerMessage>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let total = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        info!("{} joined, total: {}", id, total);
        id
    }

    /// Remove a subscriber; a no-op for ids already gone
    pub fn leave(&self, id: SubscriberId) {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            info!("{} left, total: {}", id, self.subscriber_count());
        } else {
            debug!("{} already removed", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver a message to every live subscriber
    ///
    /// Deliveries run concurrently over a snapshot taken under the lock,
    /// each bounded by the delivery timeout. Failed or timed-out
    /// subscribers are removed afterwards; a slow subscriber never delays
    /// the rest.
    pub async fn broadcast(&self, message: ServerMessage) {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<ServerMessage>)> = {
            let subscribers = self.subscribers.lock();
            subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return;
        }

        let deliveries = snapshot.into_iter().map(|(id, tx)| {
            let message = message.clone();
            let timeout = self.delivery_timeout;
            async move {
                match tokio::time::timeout(timeout, tx.send(message)).await {
                    Ok(Ok(())) => None,
                    // Receiver dropped
                    Ok(Err(_)) => Some(id),
                    // Queue stayed full past the timeout
                    Err(_) => Some(id),
                }
            }
        });

        let failed: Vec<SubscriberId> = join_all(deliveries).await.into_iter().flatten().collect();
        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in failed {
                if subscribers.remove(&id).is_some() {
                    warn!("dropped unresponsive {}", id);
                }
            }
        }
    }

    /// Forward a subscriber's subscribe request upstream
    ///
    /// Ensures the upstream client is connected before subscribing.
    pub async fn handle_subscribe_request(
        &self,
        channels: Vec<String>,
        market_tickers: Option<Vec<String>>,
    ) -> RelayResult<()> {
        if self.upstream.state().await != ConnectionState::Connected {
            self.upstream.connect().await;
        }
        self.upstream.subscribe(channels, market_tickers).await
    }

    /// Forward a subscriber's unsubscribe request upstream
    ///
    /// No connect-on-demand: unsubscribing from a disconnected feed only
    /// narrows intent, and is still acknowledged downstream.
    pub async fn handle_unsubscribe_request(
        &self,
        channels: Vec<String>,
        market_tickers: Option<Vec<String>>,
    ) -> RelayResult<()> {
        self.upstream.unsubscribe(channels, market_tickers).await
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscriber_count())
            .field("delivery_timeout", &self.delivery_timeout)
            .finish()
    }
}
