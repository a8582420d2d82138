//! Wire protocol for both sides of the relay
//!
//! Upstream: subscribe/unsubscribe command envelopes sent to the Kalshi
//! feed. Downstream: the JSON messages exchanged with local subscribers.
//! Both sides use compatible JSON envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Upstream Commands
// ============================================================================

/// Command verb sent to the upstream feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Subscribe,
    Unsubscribe,
}

/// Command envelope sent to the upstream feed
///
/// `id` is a per-client monotonically increasing sequence number so the
/// upstream can correlate acknowledgements. The relay itself does not
/// await or correlate them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: u64,
    pub cmd: CommandKind,
    pub params: CommandParams,
}

/// Parameters for subscribe/unsubscribe commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandParams {
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_tickers: Option<Vec<String>>,
}

impl Command {
    pub fn subscribe(id: u64, channels: Vec<String>, market_tickers: Option<Vec<String>>) -> Self {
        Self {
            id,
            cmd: CommandKind::Subscribe,
            params: CommandParams {
                channels,
                market_tickers,
            },
        }
    }

    pub fn unsubscribe(
        id: u64,
        channels: Vec<String>,
        market_tickers: Option<Vec<String>>,
    ) -> Self {
        Self {
            id,
            cmd: CommandKind::Unsubscribe,
            params: CommandParams {
                channels,
                market_tickers,
            },
        }
    }
}

// ============================================================================
// Client -> Relay Messages
// ============================================================================

/// Messages sent from a local subscriber to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request upstream subscription to channels
    Subscribe {
        channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        market_tickers: Option<Vec<String>>,
    },
    /// Request upstream unsubscription from channels
    Unsubscribe {
        channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        market_tickers: Option<Vec<String>>,
    },
}

// ============================================================================
// Relay -> Client Messages
// ============================================================================

/// Messages sent from the relay to a local subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscribe request acknowledged
    Subscribed {
        channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        market_tickers: Option<Vec<String>>,
    },
    /// Unsubscribe request acknowledged
    Unsubscribed {
        channels: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        market_tickers: Option<Vec<String>>,
    },
    /// Forwarded ticker update
    Ticker { data: Value },
    /// Forwarded orderbook update (snapshot or delta)
    Orderbook { data: Value },
    /// Forwarded public trade
    Trade { data: Value },
    /// Forwarded fill
    Fill { data: Value },
    /// The relay could not process a client message
    Error { message: String },
}

impl ServerMessage {
    /// Wrap a classified upstream payload in its downstream envelope
    pub fn event(label: &str, data: Value) -> Option<ServerMessage> {
        match label {
            "ticker" => Some(ServerMessage::Ticker { data }),
            "orderbook" => Some(ServerMessage::Orderbook { data }),
            "trade" => Some(ServerMessage::Trade { data }),
            "fill" => Some(ServerMessage::Fill { data }),
            _ => None,
        }
    }
}
