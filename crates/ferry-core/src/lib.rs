//! Protocol core for Ferry — the wire message model, payload codecs,
//! validation scramble, chunk digests, discovery strings, code phrase
//! generation, and configuration. No socket I/O lives here.

pub mod config;
pub mod digest;
pub mod discovery;
pub mod handshake;
pub mod message;
pub mod phrase;
