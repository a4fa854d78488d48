//! Discovery wire strings — how clients find the broker on the local
//! network. The transport is UDP; this module only owns the payloads.

/// Default TCP port the broker listens on.
pub const DEFAULT_TCP_PORT: u16 = 60010;

/// Default UDP port the broker answers discovery probes on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 60009;

/// Probe datagram a client sends, verbatim.
pub const PROBE: &[u8] = b"pingpong_discover_v1";

/// Prefix of the broker's reply; the TCP port follows after a slash.
pub const REPLY_PREFIX: &str = "pingpong_server_v1";

/// Does a datagram ask for a broker?
pub fn is_probe(data: &[u8]) -> bool {
    data == PROBE
}

/// Reply payload advertising `tcp_port`, e.g. `pingpong_server_v1/60010`.
pub fn reply_for_port(tcp_port: u16) -> String {
    format!("{REPLY_PREFIX}/{tcp_port}")
}

/// Parse a reply datagram; returns the advertised TCP port.
pub fn parse_reply(data: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(data).ok()?;
    let rest = text.strip_prefix(REPLY_PREFIX)?;
    rest.strip_prefix('/')?.parse().ok()
}
