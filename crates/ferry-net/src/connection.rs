//! One framed connection over a reliable stream.
//!
//! Frames are `[id: u32 LE][size: u32 LE][body: size bytes]`. The read
//! loop and the write drive each run as their own task; the write drive
//! serializes header-then-body per message, so messages leave the socket
//! in the order they were queued. Any stream error is terminal: the tasks
//! wind down, `is_connected` flips, and a single `Closed` event tells the
//! owner to drop its records.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};

use ferry_core::message::{Message, MsgId};

/// Stable identifier the broker uses to key its tables.
pub type ConnId = u32;

/// Wire header: message id plus body length, both little-endian u32.
pub const HEADER_LEN: usize = 8;

/// Sanity cap on a single frame body, checked before the body allocation.
/// Broker-level chunk policing happens later and is much stricter.
pub const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// Inbound events, tagged with the originating connection by the shared
/// queue they arrive on.
#[derive(Debug)]
pub enum ConnEvent {
    Message(Message),
    /// Emitted exactly once, after the read loop ends for any reason.
    Closed,
}

enum WriteCmd {
    Frame(Message),
    Shutdown,
}

struct Shared {
    connected: AtomicBool,
    validated: AtomicBool,
    pending_writes: AtomicUsize,
    drained: Notify,
}

/// Cloneable handle to one framed connection.
#[derive(Clone)]
pub struct Connection {
    id: ConnId,
    outbound: mpsc::Sender<WriteCmd>,
    shared: Arc<Shared>,
}

impl Connection {
    /// Start the read and write tasks for a stream that already passed
    /// validation. Every inbound message lands on `events` tagged with
    /// `id`, followed by one `Closed` when the stream dies.
    ///
    /// `queue_depth` bounds the outbound queue; `send` waits for room
    /// rather than growing it.
    pub fn spawn<S>(
        id: ConnId,
        stream: S,
        queue_depth: usize,
        events: mpsc::Sender<(ConnId, ConnEvent)>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, wr) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(queue_depth.max(1));
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            validated: AtomicBool::new(true),
            pending_writes: AtomicUsize::new(0),
            drained: Notify::new(),
        });

        tokio::spawn(read_loop(rd, id, events, shared.clone()));
        tokio::spawn(write_loop(wr, outbound_rx, shared.clone()));

        Self { id, outbound, shared }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_validated(&self) -> bool {
        self.shared.validated.load(Ordering::Acquire)
    }

    /// Messages queued or mid-write, drained by [`flush`](Self::flush).
    pub fn pending_writes(&self) -> usize {
        self.shared.pending_writes.load(Ordering::Acquire)
    }

    /// Queue a message for transmission. Waits for queue room when the
    /// peer is slow. Returns false — and drops the message — when the
    /// connection is not validated or already closed.
    pub async fn send(&self, msg: Message) -> bool {
        if !self.is_validated() || !self.is_connected() {
            return false;
        }
        self.shared.pending_writes.fetch_add(1, Ordering::AcqRel);
        if self.outbound.send(WriteCmd::Frame(msg)).await.is_err() {
            self.shared.pending_writes.fetch_sub(1, Ordering::AcqRel);
            self.shared.drained.notify_waiters();
            return false;
        }
        true
    }

    /// Wait until every queued message has been fully written (or the
    /// connection died and took the queue with it).
    pub async fn flush(&self) {
        loop {
            let drained = self.shared.drained.notified();
            tokio::pin!(drained);
            // Register before the check so a wakeup between the load and
            // the await cannot be missed.
            drained.as_mut().enable();
            if self.shared.pending_writes.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Flush, then shut the write half down. The peer observes EOF; our
    /// read loop reports `Closed` once the peer hangs up in turn.
    pub async fn disconnect_after_flush(&self) {
        self.flush().await;
        let _ = self.outbound.send(WriteCmd::Shutdown).await;
    }

    /// Close promptly, abandoning queued writes.
    pub fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::Release);
        let _ = self.outbound.try_send(WriteCmd::Shutdown);
    }
}

async fn read_loop<R>(
    mut rd: R,
    id: ConnId,
    events: mpsc::Sender<(ConnId, ConnEvent)>,
    shared: Arc<Shared>,
) where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    loop {
        if rd.read_exact(&mut header).await.is_err() {
            break;
        }

        let mut raw = [0u8; 4];
        raw.copy_from_slice(&header[..4]);
        let raw_id = u32::from_le_bytes(raw);
        raw.copy_from_slice(&header[4..]);
        let size = u32::from_le_bytes(raw);

        let msg_id = match MsgId::try_from(raw_id) {
            Ok(m) => m,
            Err(_) => {
                tracing::warn!(conn = id, raw_id, "unknown message id, closing");
                break;
            }
        };
        if size > MAX_FRAME {
            tracing::warn!(conn = id, size, "frame over the size cap, closing");
            break;
        }

        let mut body = vec![0u8; size as usize];
        if size > 0 && rd.read_exact(&mut body).await.is_err() {
            break;
        }

        if events.send((id, ConnEvent::Message(Message { id: msg_id, body }))).await.is_err() {
            break;
        }
    }

    shared.connected.store(false, Ordering::Release);
    let _ = events.send((id, ConnEvent::Closed)).await;
}

async fn write_loop<W>(mut wr: W, mut outbound: mpsc::Receiver<WriteCmd>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    let mut header = BytesMut::with_capacity(HEADER_LEN);

    while let Some(cmd) = outbound.recv().await {
        let msg = match cmd {
            WriteCmd::Frame(msg) => msg,
            WriteCmd::Shutdown => break,
        };

        header.clear();
        header.put_u32_le(msg.id as u32);
        header.put_u32_le(msg.size());

        let mut result = wr.write_all(&header).await;
        if result.is_ok() && !msg.body.is_empty() {
            result = wr.write_all(&msg.body).await;
        }

        if shared.pending_writes.fetch_sub(1, Ordering::AcqRel) == 1 {
            shared.drained.notify_waiters();
        }

        if let Err(e) = result {
            tracing::debug!(error = %e, "write failed, closing connection");
            break;
        }
    }

    let _ = wr.shutdown().await;
    outbound.close();
    shared.connected.store(false, Ordering::Release);
    // Queued-but-unwritten messages will never go out; release flushers.
    shared.pending_writes.store(0, Ordering::Release);
    shared.drained.notify_waiters();
}
