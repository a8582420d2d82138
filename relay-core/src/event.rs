//! Classification of upstream feed events
//!
//! The upstream protocol tags every frame with a string `type`. Inside the
//! relay those strings are mapped to a finite set of known categories;
//! the string-keyed form survives only at the router boundary.

use serde::{Deserialize, Serialize};

/// Known upstream event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Price/volume update for a market
    Ticker,
    /// Full orderbook state
    OrderbookSnapshot,
    /// Incremental orderbook update
    OrderbookDelta,
    /// Public trade executed
    Trade,
    /// One of our orders filled
    Fill,
}

impl EventKind {
    /// All known categories, in the order the bridge registers them
    pub const ALL: [EventKind; 5] = [
        EventKind::Ticker,
        EventKind::OrderbookSnapshot,
        EventKind::OrderbookDelta,
        EventKind::Trade,
        EventKind::Fill,
    ];

    /// The upstream `type` string for this category
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ticker => "ticker",
            EventKind::OrderbookSnapshot => "orderbook_snapshot",
            EventKind::OrderbookDelta => "orderbook_delta",
            EventKind::Trade => "trade",
            EventKind::Fill => "fill",
        }
    }

    /// The downstream envelope label for this category
    ///
    /// Orderbook snapshots and deltas are re-labeled into a single
    /// `orderbook` category for subscribers.
    pub fn downstream_label(&self) -> &'static str {
        match self {
            EventKind::Ticker => "ticker",
            EventKind::OrderbookSnapshot | EventKind::OrderbookDelta => "orderbook",
            EventKind::Trade => "trade",
            EventKind::Fill => "fill",
        }
    }

    /// Classify an upstream `type` string, if it names a known category
    pub fn from_type_str(s: &str) -> Option<EventKind> {
        match s {
            "ticker" => Some(EventKind::Ticker),
            "orderbook_snapshot" => Some(EventKind::OrderbookSnapshot),
            "orderbook_delta" => Some(EventKind::OrderbookDelta),
            "trade" => Some(EventKind::Trade),
            "fill" => Some(EventKind::Fill),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
