//! Ferry client library — chunked transfer sessions, the send and
//! receive routines on top of them, and LAN broker discovery. The `ferry`
//! binary is a thin CLI over these modules; the integration suite drives
//! them directly.

pub mod discovery;
pub mod receiver;
pub mod sender;
pub mod session;
