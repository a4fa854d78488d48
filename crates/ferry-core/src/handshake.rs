//! Connection validation — the nonce scramble that gates the message loop.
//!
//! The broker writes a fresh nonce to every accepted stream and only
//! starts framing once the peer echoes the scrambled form back. This keeps
//! arbitrary stream peers out of the message loop; it is not a security
//! boundary.

const XOR_IN: u64 = 0xBABA_15AC_AB00_11FF;
const XOR_OUT: u64 = 0xBABA_15FA_CE1E_E788;
const NIBBLE_MASK: u64 = 0x00C0_A0C0_A0B0_B0B0;

/// Scramble a validation nonce. Both ends compute this over the same
/// nonce; the broker compares the peer's reply byte for byte. The exact
/// constants are part of the protocol.
pub fn scramble(nonce: u64) -> u64 {
    let masked = (nonce ^ XOR_IN) & NIBBLE_MASK;
    ((masked >> 4) | (masked << 4)) ^ XOR_OUT
}

/// Clock-derived nonce. Freshness is all that matters here.
pub fn fresh_nonce() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5EED)
}
