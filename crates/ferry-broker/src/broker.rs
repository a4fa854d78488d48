//! The pairing state machine and chunk relay.
//!
//! Every connection is in exactly one role: `Unassigned` until it commits
//! to a protocol, `PendingSender` once it has advertised a code phrase,
//! then `Relaying`/`Receiving` for the two ends of an active transfer.
//! All state lives on the single dispatch task, so transitions never race
//! and the three pairing tables move together.
//!
//! The broker polices chunk length only; digests are verified by the
//! receiver and chunk bodies are forwarded verbatim. Nothing a client
//! does crashes the broker: violations answer `Reject` or `Abort` and the
//! offender's socket stays open until it hangs up.

use std::collections::HashMap;

use tokio::sync::mpsc;

use ferry_core::digest::DIGEST_LEN;
use ferry_core::message::{CodePhrase, Message, MsgId, PostMetadata, PreMetadata};
use ferry_net::{ConnEvent, ConnId, Connection};

/// In-memory record pairing one sender with one receiver.
struct RelaySession {
    code: String,
    receiver: ConnId,
    file_size: u64,
    max_chunk_size: u64,
}

enum Role {
    Unassigned,
    PendingSender { code: String, post: PostMetadata },
    Relaying(RelaySession),
    Receiving { sender: ConnId },
}

#[derive(Clone, Copy)]
enum RoleTag {
    Unassigned,
    PendingSender,
    Relaying,
    Receiving,
}

impl Role {
    fn tag(&self) -> RoleTag {
        match self {
            Role::Unassigned => RoleTag::Unassigned,
            Role::PendingSender { .. } => RoleTag::PendingSender,
            Role::Relaying(_) => RoleTag::Relaying,
            Role::Receiving { .. } => RoleTag::Receiving,
        }
    }
}

struct Peer {
    conn: Connection,
    role: Role,
}

pub struct Broker {
    peers: HashMap<ConnId, Peer>,
    code_to_sender: HashMap<String, ConnId>,
    max_chunk_size: u64,
}

impl Broker {
    pub fn new(max_chunk_size: u64) -> Self {
        Self {
            peers: HashMap::new(),
            code_to_sender: HashMap::new(),
            max_chunk_size,
        }
    }

    /// Dispatch loop. Consumes validated connections from `accepted` and
    /// their traffic from `events`; returns when both channels close.
    pub async fn run(
        mut self,
        mut accepted: mpsc::Receiver<Connection>,
        mut events: mpsc::Receiver<(ConnId, ConnEvent)>,
    ) {
        loop {
            tokio::select! {
                conn = accepted.recv() => match conn {
                    Some(conn) => self.on_accepted(conn),
                    None => break,
                },
                event = events.recv() => match event {
                    Some((id, ConnEvent::Message(msg))) => self.on_message(id, msg).await,
                    Some((id, ConnEvent::Closed)) => self.on_closed(id).await,
                    None => break,
                },
            }
        }
        tracing::info!("broker dispatch loop ended");
    }

    fn on_accepted(&mut self, conn: Connection) {
        let id = conn.id();
        tracing::info!(conn = id, "connection registered");
        self.peers.insert(id, Peer { conn, role: Role::Unassigned });
    }

    async fn on_message(&mut self, id: ConnId, msg: Message) {
        let tag = match self.peers.get(&id) {
            Some(peer) => peer.role.tag(),
            None => return,
        };
        match tag {
            RoleTag::Unassigned => self.on_unassigned(id, msg).await,
            RoleTag::PendingSender => self.on_pending_sender(id, msg).await,
            RoleTag::Relaying => self.on_relaying(id, msg).await,
            RoleTag::Receiving => self.on_receiving(id, msg).await,
        }
    }

    // ── Unassigned ────────────────────────────────────────────────────────

    async fn on_unassigned(&mut self, id: ConnId, msg: Message) {
        match msg.id {
            MsgId::Send => self.handle_advertise(id, msg).await,
            MsgId::RequestReceive => self.handle_probe(id, msg).await,
            MsgId::Receive => self.handle_claim(id, msg).await,
            other => {
                tracing::debug!(conn = id, msg = ?other, "illegal message from unassigned connection");
                self.reply(id, Message::new(MsgId::Abort)).await;
            }
        }
    }

    async fn handle_advertise(&mut self, id: ConnId, mut msg: Message) {
        let pre = match PreMetadata::pop_from(&mut msg) {
            Ok(pre) => pre,
            Err(e) => {
                tracing::warn!(conn = id, error = %e, "malformed advertise");
                self.reply(id, Message::new(MsgId::Reject)).await;
                return;
            }
        };

        let code = pre.code_phrase.code.clone();
        if self.code_to_sender.contains_key(&code) {
            tracing::info!(conn = id, code = %code, "code phrase already registered, rejecting");
            self.reply(id, Message::new(MsgId::Reject)).await;
            return;
        }

        let post = PostMetadata {
            payload_type: pre.payload_type,
            max_chunk_size: self.max_chunk_size,
            code_phrase: pre.code_phrase,
            file_data: pre.file_data,
        };
        tracing::info!(
            conn = id,
            code = %code,
            file = %post.file_data.file_name,
            size = post.file_data.file_size,
            "transfer advertised"
        );

        self.code_to_sender.insert(code.clone(), id);
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.role = Role::PendingSender { code, post };
        }
        // No reply: the receiver's claim triggers the Accept.
    }

    async fn handle_probe(&mut self, id: ConnId, mut msg: Message) {
        let pre = match PreMetadata::pop_from(&mut msg) {
            Ok(pre) => pre,
            Err(e) => {
                tracing::warn!(conn = id, error = %e, "malformed receive probe");
                self.reply(id, Message::new(MsgId::Reject)).await;
                return;
            }
        };

        match self.pending_post(&pre.code_phrase.code) {
            Some(post) => {
                tracing::debug!(conn = id, code = %pre.code_phrase.code, "answering receive probe");
                self.reply(id, post.to_message(MsgId::Accept)).await;
            }
            None => {
                tracing::info!(conn = id, code = %pre.code_phrase.code, "probe for unknown code phrase");
                self.reply(id, Message::new(MsgId::Reject)).await;
            }
        }
    }

    async fn handle_claim(&mut self, id: ConnId, mut msg: Message) {
        let code = match CodePhrase::pop_from(&mut msg) {
            Ok(phrase) => phrase.code,
            Err(e) => {
                tracing::warn!(conn = id, error = %e, "malformed claim");
                self.reply(id, Message::new(MsgId::Abort)).await;
                return;
            }
        };

        let sender_id = match self.code_to_sender.get(&code).copied() {
            Some(sender_id) => sender_id,
            None => {
                tracing::info!(conn = id, code = %code, "claim for unknown code phrase");
                self.reply(id, Message::new(MsgId::Abort)).await;
                return;
            }
        };
        // The sender must still be pending: one relay per sender.
        let post = match self.pending_post(&code) {
            Some(post) => post,
            None => {
                tracing::info!(conn = id, code = %code, "claim for a code phrase already relaying");
                self.reply(id, Message::new(MsgId::Abort)).await;
                return;
            }
        };

        let session = RelaySession {
            code: code.clone(),
            receiver: id,
            file_size: post.file_data.file_size,
            max_chunk_size: post.max_chunk_size,
        };
        if let Some(sender) = self.peers.get_mut(&sender_id) {
            sender.role = Role::Relaying(session);
        }
        if let Some(receiver) = self.peers.get_mut(&id) {
            receiver.role = Role::Receiving { sender: sender_id };
        }
        tracing::info!(
            sender = sender_id,
            receiver = id,
            code = %code,
            size = post.file_data.file_size,
            "relay started"
        );

        // The Accept to the sender is its signal to start streaming.
        self.reply(sender_id, post.to_message(MsgId::Accept)).await;
    }

    /// Manifest for a code phrase, only while its sender is still pending.
    fn pending_post(&self, code: &str) -> Option<PostMetadata> {
        let sender_id = self.code_to_sender.get(code)?;
        match &self.peers.get(sender_id)?.role {
            Role::PendingSender { post, .. } => Some(post.clone()),
            _ => None,
        }
    }

    // ── PendingSender ─────────────────────────────────────────────────────

    async fn on_pending_sender(&mut self, id: ConnId, msg: Message) {
        match msg.id {
            MsgId::Send => {
                // First registration wins; the repeat is refused and the
                // original stays claimable.
                tracing::info!(conn = id, "repeat advertise from pending sender, rejecting");
                self.reply(id, Message::new(MsgId::Reject)).await;
            }
            other => {
                tracing::warn!(conn = id, msg = ?other, "protocol violation from pending sender");
                self.drop_pending(id);
                self.reply(id, Message::new(MsgId::Abort)).await;
            }
        }
    }

    fn drop_pending(&mut self, id: ConnId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            if let Role::PendingSender { code, .. } = &peer.role {
                let code = code.clone();
                self.code_to_sender.remove(&code);
                peer.role = Role::Unassigned;
            }
        }
    }

    // ── Relaying (sender side) ────────────────────────────────────────────

    async fn on_relaying(&mut self, id: ConnId, msg: Message) {
        let (receiver, max_chunk_size) = match self.peers.get(&id) {
            Some(Peer { role: Role::Relaying(session), .. }) => {
                (session.receiver, session.max_chunk_size)
            }
            _ => return,
        };

        match msg.id {
            MsgId::Chunk => {
                // Length policing only; the body is opaque here.
                match msg.body.len().checked_sub(DIGEST_LEN) {
                    Some(payload_len) if payload_len as u64 <= max_chunk_size => {
                        self.reply(receiver, msg).await;
                    }
                    _ => {
                        tracing::warn!(
                            sender = id,
                            body = msg.body.len(),
                            max_chunk_size,
                            "chunk outside the size bound, aborting relay"
                        );
                        self.abort_relay(id).await;
                    }
                }
            }
            MsgId::FinalChunk => {
                tracing::debug!(sender = id, receiver, "final chunk forwarded");
                self.reply(receiver, msg).await;
            }
            other => {
                tracing::warn!(sender = id, msg = ?other, "protocol violation mid-relay");
                self.abort_relay(id).await;
            }
        }
    }

    // ── Receiving (receiver side) ─────────────────────────────────────────

    async fn on_receiving(&mut self, id: ConnId, msg: Message) {
        let sender_id = match self.peers.get(&id) {
            Some(Peer { role: Role::Receiving { sender }, .. }) => *sender,
            _ => return,
        };

        match msg.id {
            MsgId::FinishReceive => self.finish_relay(sender_id, id).await,
            MsgId::FailedReceive => {
                tracing::warn!(receiver = id, sender = sender_id, "receiver reported failure");
                self.abort_relay(sender_id).await;
            }
            other => {
                tracing::warn!(receiver = id, msg = ?other, "protocol violation from receiver");
                self.abort_relay(sender_id).await;
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    async fn finish_relay(&mut self, sender_id: ConnId, receiver_id: ConnId) {
        if let Some(sender) = self.peers.get_mut(&sender_id) {
            if let Role::Relaying(session) = std::mem::replace(&mut sender.role, Role::Unassigned)
            {
                self.code_to_sender.remove(&session.code);
                tracing::info!(
                    sender = sender_id,
                    receiver = receiver_id,
                    code = %session.code,
                    size = session.file_size,
                    "transfer completed"
                );
            }
        }
        if let Some(receiver) = self.peers.get_mut(&receiver_id) {
            receiver.role = Role::Unassigned;
            let conn = receiver.conn.clone();
            // Let the receiver drain its queue and hang up on its own.
            tokio::spawn(async move { conn.disconnect_after_flush().await });
        }
        self.reply(sender_id, Message::new(MsgId::Success)).await;
    }

    /// Tear a relay down from the sender's id: both roles reset, the code
    /// phrase is freed, and both ends hear `Abort`. Sockets stay open.
    async fn abort_relay(&mut self, sender_id: ConnId) {
        let mut receiver_id = None;
        if let Some(sender) = self.peers.get_mut(&sender_id) {
            if let Role::Relaying(session) = std::mem::replace(&mut sender.role, Role::Unassigned)
            {
                self.code_to_sender.remove(&session.code);
                receiver_id = Some(session.receiver);
            }
        }
        if let Some(receiver_id) = receiver_id {
            if let Some(receiver) = self.peers.get_mut(&receiver_id) {
                receiver.role = Role::Unassigned;
            }
            self.reply(receiver_id, Message::new(MsgId::Abort)).await;
        }
        self.reply(sender_id, Message::new(MsgId::Abort)).await;
    }

    async fn on_closed(&mut self, id: ConnId) {
        let Some(peer) = self.peers.remove(&id) else { return };
        match peer.role {
            Role::Unassigned => {
                tracing::info!(conn = id, "connection closed");
            }
            Role::PendingSender { code, .. } => {
                self.code_to_sender.remove(&code);
                tracing::info!(conn = id, code = %code, "pending sender disconnected");
            }
            Role::Relaying(session) => {
                tracing::warn!(
                    sender = id,
                    receiver = session.receiver,
                    code = %session.code,
                    "sender disconnected mid-relay"
                );
                self.code_to_sender.remove(&session.code);
                if let Some(receiver) = self.peers.get_mut(&session.receiver) {
                    receiver.role = Role::Unassigned;
                }
                self.reply(session.receiver, Message::new(MsgId::Abort)).await;
            }
            Role::Receiving { sender } => {
                tracing::warn!(receiver = id, sender, "receiver disconnected mid-relay");
                if let Some(sender_peer) = self.peers.get_mut(&sender) {
                    if let Role::Relaying(session) =
                        std::mem::replace(&mut sender_peer.role, Role::Unassigned)
                    {
                        self.code_to_sender.remove(&session.code);
                    }
                }
                self.reply(sender, Message::new(MsgId::Abort)).await;
            }
        }
    }

    async fn reply(&self, id: ConnId, msg: Message) {
        let Some(conn) = self.peers.get(&id).map(|p| p.conn.clone()) else {
            return;
        };
        if !conn.send(msg).await {
            tracing::debug!(conn = id, "send to closed connection dropped");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
