//! Framed message transport for Ferry connections.
//!
//! One `Connection` per stream: a read-loop task turns wire frames into
//! tagged inbound events, a write-drive task serializes queued messages,
//! and the handle exposes send/flush/disconnect to the owner. The
//! validation handshake in [`validate`] gates everything.

pub mod client;
pub mod connection;
pub mod validate;

pub use client::Client;
pub use connection::{ConnEvent, ConnId, Connection};
