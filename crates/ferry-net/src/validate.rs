//! Validation handshake I/O — the eight-byte exchange that gates the
//! message loop on both ends of a stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ferry_core::handshake::{fresh_nonce, scramble};

/// Broker side: issue a nonce and require the scrambled reply. On
/// mismatch the caller closes the stream; no frame is ever read from an
/// unvalidated peer.
pub async fn validate_inbound<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce = fresh_nonce();
    let expected = scramble(nonce);

    stream.write_all(&nonce.to_le_bytes()).await?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if u64::from_le_bytes(reply) != expected {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "validation reply mismatch"));
    }
    Ok(())
}

/// Client side: scramble the broker's nonce and echo it back.
pub async fn validate_outbound<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut nonce = [0u8; 8];
    stream.read_exact(&mut nonce).await?;

    let reply = scramble(u64::from_le_bytes(nonce));
    stream.write_all(&reply.to_le_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
