//! Transport seam for the upstream feed
//!
//! The client speaks JSON text frames over a persistent socket. The traits
//! here isolate it from tokio-tungstenite so the reconnect and resubscribe
//! machinery can be exercised against an in-memory transport in tests.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use relay_core::{RelayError, RelayResult};

use crate::signer::{
    AuthHeaders, ACCESS_KEY_HEADER, ACCESS_SIGNATURE_HEADER, ACCESS_TIMESTAMP_HEADER,
};

/// Kalshi WebSocket URL
pub const KALSHI_WS_URL: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";

/// Write half of an open feed connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame
    async fn send(&mut self, frame: String) -> RelayResult<()>;
    /// Close the connection, unblocking the paired reader
    async fn close(&mut self) -> RelayResult<()>;
}

/// Read half of an open feed connection
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame; `None` once the connection is closed
    async fn next_frame(&mut self) -> Option<RelayResult<String>>;
}

/// Opens authenticated connections to the upstream feed
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn connect(
        &self,
        auth: &AuthHeaders,
    ) -> RelayResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct KalshiTransport {
    url: String,
}

impl KalshiTransport {
    pub fn new() -> Self {
        Self {
            url: KALSHI_WS_URL.to_string(),
        }
    }

    /// Point the transport at a non-default endpoint (demo environment)
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for KalshiTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedTransport for KalshiTransport {
    async fn connect(
        &self,
        auth: &AuthHeaders,
    ) -> RelayResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::transport(format!("failed to build request: {e}")))?;

        // Auth headers are sent once per connection attempt, not per message
        let headers = request.headers_mut();
        headers.insert(
            ACCESS_KEY_HEADER,
            auth.key_id
                .parse()
                .map_err(|_| RelayError::config("access key id is not a valid header value"))?,
        );
        headers.insert(
            ACCESS_SIGNATURE_HEADER,
            auth.signature
                .parse()
                .map_err(|_| RelayError::config("signature is not a valid header value"))?,
        );
        headers.insert(
            ACCESS_TIMESTAMP_HEADER,
            auth.timestamp
                .parse()
                .map_err(|_| RelayError::config("timestamp is not a valid header value"))?,
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| RelayError::transport(format!("connect failed: {e}")))?;

        let (write, read) = ws_stream.split();
        Ok((Box::new(WsSink { write }), Box::new(WsReader { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> RelayResult<()> {
        self.write
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| RelayError::transport(format!("send failed: {e}")))
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.write
            .close()
            .await
            .map_err(|e| RelayError::transport(format!("close failed: {e}")))
    }
}

struct WsReader {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsReader {
    async fn next_frame(&mut self) -> Option<RelayResult<String>> {
        while let Some(msg) = self.read.next().await {
            match msg {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!("upstream sent close frame: {:?}", frame);
                    return None;
                }
                // Ping/pong are handled by tungstenite; binary frames are
                // not part of the feed protocol.
                Ok(other) => {
                    debug!("skipping non-text frame: {:?}", other);
                }
                Err(e) => return Some(Err(RelayError::transport(e.to_string()))),
            }
        }
        None
    }
}
