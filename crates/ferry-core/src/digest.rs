//! SHA-256 chunk digests.
//!
//! Every relayed chunk carries a digest of its payload as a trailer; the
//! receiver recomputes and compares before a single byte reaches the sink.

use sha2::{Digest, Sha256};

/// Length of the digest trailer appended to every chunk.
pub const DIGEST_LEN: usize = 32;

/// Digest one chunk's payload bytes (the trailer itself is never hashed).
pub fn sha256_chunk(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
