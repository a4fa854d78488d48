//! Chunked transfer sessions — byte stream to wire and back.
//!
//! The sender splits its source into digest-trailed chunks and always
//! finishes with an empty `FinalChunk`, success or not, so the far side
//! can unwind. The receiver verifies every digest before a byte touches
//! the sink. Both report plain pass/fail; the routines in `sender` and
//! `receiver` turn that into exit codes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ferry_core::digest::sha256_chunk;
use ferry_core::message::{chunk_message, split_chunk, Message, MsgId, PayloadType};
use ferry_net::Client;

/// Streams a local byte source to the broker in digest-trailed chunks.
pub struct SenderSession {
    payload_type: PayloadType,
    max_chunk_size: u64,
}

impl SenderSession {
    pub fn new(payload_type: PayloadType, max_chunk_size: u64) -> Self {
        Self { payload_type, max_chunk_size }
    }

    /// Drive the source to exhaustion. True when every chunk and the
    /// final marker went out without an abort from the broker.
    pub async fn run<R>(&self, client: &mut Client, source: &mut R) -> bool
    where
        R: AsyncRead + Unpin,
    {
        tracing::debug!(
            payload = ?self.payload_type,
            max_chunk_size = self.max_chunk_size,
            "sender session starting"
        );

        let mut buf = vec![0u8; self.max_chunk_size as usize];
        let mut ok = true;

        loop {
            // Cooperative abort: the broker can kill the relay mid-stream.
            let mut aborted = false;
            while let Some(msg) = client.try_recv() {
                match msg.id {
                    MsgId::Abort => {
                        tracing::warn!("broker aborted the transfer");
                        aborted = true;
                    }
                    other => {
                        tracing::debug!(msg = ?other, "ignoring unexpected message mid-stream");
                    }
                }
            }
            if aborted {
                ok = false;
                break;
            }

            let filled = match read_full(source, &mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "source read failed");
                    ok = false;
                    break;
                }
            };
            if filled == 0 {
                break;
            }

            if !client.send(chunk_message(&buf[..filled])).await {
                tracing::warn!("transport refused a chunk, stopping");
                ok = false;
                break;
            }
        }

        // The final marker goes out even on failure so the peer unwinds.
        client.send(Message::new(MsgId::FinalChunk)).await;
        ok
    }
}

/// Fill `buf` as far as the stream allows; short only at end of stream.
async fn read_full<R>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Consumes digest-trailed chunks into a local sink.
pub struct ReceiverSession {
    payload_type: PayloadType,
}

impl ReceiverSession {
    pub fn new(payload_type: PayloadType) -> Self {
        Self { payload_type }
    }

    /// Consume chunks until `FinalChunk`. True when the whole stream
    /// verified and the sink flushed; every failure path tells the broker
    /// with `FailedReceive` before returning.
    pub async fn run<W>(&self, client: &mut Client, sink: &mut W) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        tracing::debug!(payload = ?self.payload_type, "receiver session starting");

        let mut received: u64 = 0;
        loop {
            let Some(msg) = client.recv().await else {
                tracing::warn!("connection closed mid-transfer");
                return false;
            };

            match msg.id {
                MsgId::Chunk => {
                    let (data, claimed) = match split_chunk(msg) {
                        Ok(parts) => parts,
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed chunk");
                            self.fail(client).await;
                            return false;
                        }
                    };
                    if sha256_chunk(&data) != claimed {
                        tracing::warn!(bytes = data.len(), "chunk digest mismatch");
                        self.fail(client).await;
                        return false;
                    }
                    if let Err(e) = sink.write_all(&data).await {
                        tracing::warn!(error = %e, "sink write failed");
                        self.fail(client).await;
                        return false;
                    }
                    received += data.len() as u64;
                }
                MsgId::FinalChunk => {
                    if let Err(e) = sink.flush().await {
                        tracing::warn!(error = %e, "sink flush failed");
                        self.fail(client).await;
                        return false;
                    }
                    tracing::info!(bytes = received, "receive session complete");
                    return true;
                }
                MsgId::Abort => {
                    tracing::warn!("broker aborted the transfer");
                    return false;
                }
                other => {
                    tracing::warn!(msg = ?other, "unexpected message mid-transfer");
                    return false;
                }
            }
        }
    }

    async fn fail(&self, client: &Client) {
        client.send(Message::new(MsgId::FailedReceive)).await;
    }
}
