//! Fan-out services for the Kalshi feed relay
//!
//! This crate owns the downstream side: the broadcast hub tracking live
//! subscriber connections, and the bridge that forwards classified
//! upstream events into it.

mod bridge;
mod hub;

pub use bridge::register_feed_handlers;
pub use hub::{BroadcastHub, SubscriberId};
