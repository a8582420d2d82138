//! Kalshi upstream feed client for the relay
//!
//! This crate owns the single authenticated connection to the Kalshi
//! real-time feed: HMAC request signing, the transport seam, the
//! reconnecting client with subscription replay, and the event router
//! that fans classified frames out to registered handlers.

pub mod client;
pub mod router;
pub mod signer;
pub mod transport;

pub use client::{ConnectionState, UpstreamClient};
pub use router::EventRouter;
pub use signer::{AuthHeaders, FeedCredentials, Signer};
pub use transport::{FeedTransport, FrameSink, FrameStream, KalshiTransport};
