//! Core types for the Kalshi feed relay
//!
//! This crate defines the shared data structures used across the relay,
//! including the upstream command envelopes, the downstream client/server
//! protocol, and event classification.

pub mod error;
pub mod event;
pub mod protocol;

pub use error::{RelayError, RelayResult};
pub use event::EventKind;
pub use protocol::{ClientMessage, Command, CommandKind, CommandParams, ServerMessage};
