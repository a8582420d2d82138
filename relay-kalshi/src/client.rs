//! Reconnecting client for the Kalshi real-time feed
//!
//! Owns the single upstream connection: authenticates, tracks subscription
//! intent, receives and classifies inbound frames, detects closure, and
//! reconnects with exponential backoff while replaying subscription state.
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Disconnected`
//! in a loop, terminal only on explicit shutdown. Transport failures are
//! retried internally and never surface to `connect()` callers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use relay_core::{Command, RelayError, RelayResult};

use crate::router::EventRouter;
use crate::signer::Signer;
use crate::transport::{FeedTransport, FrameSink, FrameStream};

/// Backoff starts here and is reset here on any successful connect
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Backoff ceiling
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Upstream connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// State guarded by the client's single lock
struct Shared {
    state: ConnectionState,
    writer: Option<Box<dyn FrameSink>>,
    /// Channels that should be subscribed, independent of connection state
    intent: HashSet<String>,
    /// Channels already covered by a subscribe command on the live
    /// connection; cleared on every reconnect so the replay is never
    /// mistaken for a repeat
    sent: HashSet<String>,
    reconnect_delay: Duration,
    next_id: u64,
    /// Bumped on every successful connect; lets a stale receive loop
    /// recognize that a newer connection superseded it
    epoch: u64,
}

struct ClientInner {
    signer: Signer,
    transport: Box<dyn FeedTransport>,
    router: Arc<EventRouter>,
    shared: Mutex<Shared>,
    /// Serializes connect attempts; concurrent callers await the attempt
    /// in flight instead of racing to open duplicate transports
    connect_lock: Mutex<()>,
    shutdown: AtomicBool,
}

/// Client for the single upstream feed connection
#[derive(Clone)]
pub struct UpstreamClient {
    inner: Arc<ClientInner>,
}

impl UpstreamClient {
    pub fn new(
        signer: Signer,
        transport: impl FeedTransport,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                signer,
                transport: Box::new(transport),
                router,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    writer: None,
                    intent: HashSet::new(),
                    sent: HashSet::new(),
                    reconnect_delay: INITIAL_RECONNECT_DELAY,
                    next_id: 1,
                    epoch: 0,
                }),
                connect_lock: Mutex::new(()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.inner.shared.lock().await.state
    }

    /// Snapshot of the channels that should currently be subscribed
    pub async fn subscription_intent(&self) -> HashSet<String> {
        self.inner.shared.lock().await.intent.clone()
    }

    /// Establish the upstream connection
    ///
    /// No-op when already connected; a concurrent attempt is awaited, not
    /// duplicated. Never returns an error: a failed attempt is logged and
    /// retried on the backoff schedule.
    pub async fn connect(&self) {
        Arc::clone(&self.inner).connect().await;
    }

    /// Subscribe to channels, connecting first if necessary
    ///
    /// On success each channel is added to the subscription intent. A send
    /// failure is reported to the caller and leaves intent unchanged so the
    /// caller may retry.
    pub async fn subscribe(
        &self,
        channels: Vec<String>,
        market_tickers: Option<Vec<String>>,
    ) -> RelayResult<()> {
        let connected = self.state().await == ConnectionState::Connected;
        if !connected {
            debug!("not connected, connecting before subscribe");
            Arc::clone(&self.inner).connect().await;
        }

        self.inner
            .send_subscribe(channels, market_tickers)
            .await
            .inspect_err(|e| warn!("subscribe failed: {}", e))
    }

    /// Unsubscribe from channels
    ///
    /// Fire-and-forget: the channels leave the subscription intent whether
    /// or not the command reaches the upstream. Unsubscribing from a
    /// disconnected feed only narrows intent.
    pub async fn unsubscribe(
        &self,
        channels: Vec<String>,
        market_tickers: Option<Vec<String>>,
    ) -> RelayResult<()> {
        let mut shared = self.inner.shared.lock().await;
        for channel in &channels {
            shared.intent.remove(channel);
            shared.sent.remove(channel);
        }

        if shared.state != ConnectionState::Connected || shared.writer.is_none() {
            debug!("unsubscribe while disconnected, intent updated only");
            return Ok(());
        }

        let id = shared.next_id;
        shared.next_id += 1;
        let command = Command::unsubscribe(id, channels, market_tickers);
        match serde_json::to_string(&command) {
            Ok(frame) => {
                if let Some(writer) = shared.writer.as_mut() {
                    if let Err(e) = writer.send(frame).await {
                        warn!("failed to send unsubscribe: {}", e);
                    }
                }
            }
            Err(e) => warn!("failed to encode unsubscribe: {}", e),
        }
        Ok(())
    }

    /// Close the connection and stop all reconnect attempts
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let mut shared = self.inner.shared.lock().await;
        if let Some(mut writer) = shared.writer.take() {
            if let Err(e) = writer.close().await {
                debug!("error closing upstream connection: {}", e);
            }
        }
        shared.state = ConnectionState::Disconnected;
        info!("upstream client shut down");
    }
}

impl ClientInner {
    async fn connect(self: Arc<Self>) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let _guard = self.connect_lock.lock().await;
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut shared = self.shared.lock().await;
            if shared.state == ConnectionState::Connected {
                return;
            }
            shared.state = ConnectionState::Connecting;
        }

        let auth = self.signer.auth_headers();
        info!("connecting to upstream feed");

        match self.transport.connect(&auth).await {
            Ok((writer, reader)) => {
                let (epoch, replay) = {
                    let mut shared = self.shared.lock().await;
                    shared.state = ConnectionState::Connected;
                    shared.reconnect_delay = INITIAL_RECONNECT_DELAY;
                    shared.writer = Some(writer);
                    shared.sent.clear();
                    shared.epoch += 1;
                    let replay: Vec<String> = shared.intent.iter().cloned().collect();
                    (shared.epoch, replay)
                };
                info!("upstream feed connected");

                let inner = Arc::clone(&self);
                tokio::spawn(async move {
                    inner.receive_loop(reader, epoch).await;
                });

                if !replay.is_empty() {
                    info!("replaying {} subscribed channel(s)", replay.len());
                    if let Err(e) = self.send_subscribe(replay, None).await {
                        warn!("failed to replay subscriptions: {}", e);
                    }
                }
            }
            Err(e) => {
                warn!("upstream connect failed: {}", e);
                self.shared.lock().await.state = ConnectionState::Disconnected;
                Arc::clone(&self).schedule_reconnect();
            }
        }
    }

    /// Build and send one subscribe command covering `channels`
    ///
    /// Intent is updated only after the send succeeds. The send is skipped
    /// when no market filter is given and every channel is already covered
    /// on the live connection; a filter may widen an existing channel, so
    /// filtered requests always go out.
    async fn send_subscribe(
        &self,
        channels: Vec<String>,
        market_tickers: Option<Vec<String>>,
    ) -> RelayResult<()> {
        let mut shared = self.shared.lock().await;

        if market_tickers.is_none()
            && !channels.is_empty()
            && channels.iter().all(|c| shared.sent.contains(c))
        {
            debug!("channels already subscribed on this connection");
            return Ok(());
        }

        let id = shared.next_id;
        shared.next_id += 1;
        let command = Command::subscribe(id, channels.clone(), market_tickers);
        let frame = serde_json::to_string(&command)
            .map_err(|e| RelayError::internal(format!("failed to encode subscribe: {e}")))?;

        let writer = shared
            .writer
            .as_mut()
            .ok_or_else(|| RelayError::transport("not connected"))?;
        writer.send(frame).await?;

        for channel in channels {
            shared.sent.insert(channel.clone());
            shared.intent.insert(channel);
        }
        Ok(())
    }

    /// Receive frames until the connection closes or errors
    async fn receive_loop(self: Arc<Self>, mut reader: Box<dyn FrameStream>, epoch: u64) {
        while let Some(frame) = reader.next_frame().await {
            match frame {
                Ok(text) => self.handle_frame(&text).await,
                Err(e) => {
                    warn!("upstream receive error: {}", e);
                    break;
                }
            }
        }

        {
            let mut shared = self.shared.lock().await;
            if shared.epoch != epoch {
                // A newer connection already replaced this one
                debug!("stale receive loop exited");
                return;
            }
            shared.state = ConnectionState::Disconnected;
            shared.writer = None;
        }

        if self.shutdown.load(Ordering::SeqCst) {
            debug!("receive loop exited after shutdown");
            return;
        }

        info!("upstream feed disconnected");
        self.schedule_reconnect();
    }

    /// Parse, classify, and dispatch one inbound frame
    ///
    /// Malformed frames and upstream-reported errors are logged and
    /// dropped; nothing here terminates the receive loop.
    async fn handle_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("failed to parse upstream frame: {}", e);
                return;
            }
        };

        let Value::Object(mut object) = value else {
            warn!("upstream frame is not a JSON object");
            return;
        };

        let event_type = match object.remove("type") {
            Some(Value::String(t)) => t,
            _ => {
                warn!("upstream frame missing type field");
                return;
            }
        };

        if event_type == "error" {
            let msg = object
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            warn!("upstream feed error: {}", msg);
            return;
        }

        self.router.dispatch(&event_type, Value::Object(object)).await;
    }

    /// Spawn the backoff task for one termination event
    ///
    /// The wait suspends only this task. The shutdown flag is checked
    /// before re-entering `connect()` so a pending retry cannot reopen a
    /// connection after shutdown.
    fn schedule_reconnect(self: Arc<Self>) {
        let inner = self;
        tokio::spawn(async move {
            let delay = {
                let mut shared = inner.shared.lock().await;
                let delay = shared.reconnect_delay;
                shared.reconnect_delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                delay
            };
            info!("reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
            if inner.shutdown.load(Ordering::SeqCst) {
                debug!("reconnect cancelled by shutdown");
                return;
            }
            inner.connect().await;
        });
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("signer", &self.inner.signer)
            .finish_non_exhaustive()
    }
}
