//! Client-side wrapper: connect, validate, then speak framed messages.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use ferry_core::message::Message;

use crate::connection::{ConnEvent, ConnId, Connection};
use crate::validate::validate_outbound;

/// Outbound queue depth for client connections.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Inbound queue depth; the relay never runs far ahead of the consumer
/// thanks to the broker-side outbound bound, so this stays small.
const INBOUND_QUEUE_DEPTH: usize = 256;

/// One validated connection to a broker, with its private inbound queue.
pub struct Client {
    conn: Connection,
    inbound: mpsc::Receiver<(ConnId, ConnEvent)>,
    closed: bool,
}

impl Client {
    /// Connect to a broker, run the validation handshake, and start the
    /// framed transport.
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        validate_outbound(&mut stream).await?;

        let (events_tx, inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let conn = Connection::spawn(0, stream, OUTBOUND_QUEUE_DEPTH, events_tx);
        Ok(Self { conn, inbound, closed: false })
    }

    /// Queue a message. False when the connection is gone.
    pub async fn send(&self, msg: Message) -> bool {
        self.conn.send(msg).await
    }

    /// Next inbound message; `None` once the connection has closed and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        if self.closed {
            return None;
        }
        while let Some((_, event)) = self.inbound.recv().await {
            match event {
                ConnEvent::Message(msg) => return Some(msg),
                ConnEvent::Closed => {
                    self.closed = true;
                    return None;
                }
            }
        }
        self.closed = true;
        None
    }

    /// Bounded wait for the next message. `None` means nothing arrived
    /// within `wait`; check [`is_connected`](Self::is_connected) to tell a
    /// quiet peer from a dead one.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Message> {
        tokio::time::timeout(wait, self.recv()).await.ok().flatten()
    }

    /// Drain one already-queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        if self.closed {
            return None;
        }
        while let Ok((_, event)) = self.inbound.try_recv() {
            match event {
                ConnEvent::Message(msg) => return Some(msg),
                ConnEvent::Closed => {
                    self.closed = true;
                    return None;
                }
            }
        }
        None
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn is_validated(&self) -> bool {
        self.conn.is_validated()
    }

    pub fn pending_writes(&self) -> usize {
        self.conn.pending_writes()
    }

    /// Wait until every queued message has been written out.
    pub async fn flush(&self) {
        self.conn.flush().await
    }

    /// Flush, then close our write half.
    pub async fn disconnect_after_flush(&self) {
        self.conn.disconnect_after_flush().await
    }

    /// Close promptly, abandoning queued writes.
    pub fn disconnect(&self) {
        self.conn.disconnect()
    }
}
