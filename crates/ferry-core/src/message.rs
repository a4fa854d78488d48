//! Ferry wire model — framed messages and the payload codecs built on them.
//!
//! Every unit on a broker connection is a `Message`: a 4-byte id, a 4-byte
//! body length, and exactly that many body bytes. All fixed-width integers
//! are little-endian on the wire. The body behaves as a stack: encoders
//! push values at the tail and decoders pop them back in reverse order, so
//! a variable-length field is always pushed before its length prefix and
//! the prefix pops first.
//!
//! The id values and field layouts here are the protocol. They must not
//! change once peers are deployed.

use crate::digest::{sha256_chunk, DIGEST_LEN};

/// Closed set of wire message ids. Numeric values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MsgId {
    /// Broker accepts a transfer; body is a [`PostMetadata`].
    Accept = 0,
    /// Broker declines an advertise or receive attempt; empty body.
    Reject = 1,
    /// Broker confirms the receiver finished cleanly; sender-bound.
    Success = 2,
    /// Transfer torn down; any side may observe it.
    Abort = 3,
    /// Sender advertises a file; body is a [`PreMetadata`].
    Send = 4,
    /// Receiver probes a code phrase; body is a [`PreMetadata`].
    RequestReceive = 5,
    /// Receiver's sink closed cleanly; empty body.
    FinishReceive = 6,
    /// Receiver hit an integrity or sink failure; empty body.
    FailedReceive = 7,
    /// Receiver commits to a transfer; body is a [`CodePhrase`].
    Receive = 8,
    /// File bytes followed by their 32-byte SHA-256 trailer.
    Chunk = 9,
    /// End of the chunk stream; empty body.
    FinalChunk = 10,
}

impl TryFrom<u32> for MsgId {
    type Error = MessageError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MsgId::Accept,
            1 => MsgId::Reject,
            2 => MsgId::Success,
            3 => MsgId::Abort,
            4 => MsgId::Send,
            5 => MsgId::RequestReceive,
            6 => MsgId::FinishReceive,
            7 => MsgId::FailedReceive,
            8 => MsgId::Receive,
            9 => MsgId::Chunk,
            10 => MsgId::FinalChunk,
            other => return Err(MessageError::UnknownId(other)),
        })
    }
}

/// Errors from interpreting message bodies and payload fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("unknown message id: {0}")]
    UnknownId(u32),

    #[error("body truncated: needed {needed} bytes, {available} left")]
    Truncated { needed: usize, available: usize },

    #[error("unknown payload type: 0x{0:02x}")]
    UnknownPayloadType(u8),

    #[error("{0} is not valid UTF-8")]
    BadUtf8(&'static str),

    #[error("{field} is {len} bytes, maximum is 255")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("chunk body shorter than its digest trailer")]
    ChunkTooShort,
}

/// One framed wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MsgId,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(id: MsgId) -> Self {
        Self { id, body: Vec::new() }
    }

    /// Body length as carried in the frame header.
    pub fn size(&self) -> u32 {
        self.body.len() as u32
    }

    pub fn push_u8(&mut self, value: u8) {
        self.body.push(value);
    }

    pub fn push_u32(&mut self, value: u32) {
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u64(&mut self, value: u64) {
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_bytes(&mut self, value: &[u8]) {
        self.body.extend_from_slice(value);
    }

    pub fn pop_u8(&mut self) -> Result<u8, MessageError> {
        let at = self.tail_offset(1)?;
        let value = self.body[at];
        self.body.truncate(at);
        Ok(value)
    }

    pub fn pop_u32(&mut self) -> Result<u32, MessageError> {
        let at = self.tail_offset(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.body[at..]);
        self.body.truncate(at);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn pop_u64(&mut self) -> Result<u64, MessageError> {
        let at = self.tail_offset(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.body[at..]);
        self.body.truncate(at);
        Ok(u64::from_le_bytes(raw))
    }

    /// Pop exactly `len` bytes off the tail.
    pub fn pop_bytes(&mut self, len: usize) -> Result<Vec<u8>, MessageError> {
        let at = self.tail_offset(len)?;
        Ok(self.body.split_off(at))
    }

    fn tail_offset(&self, len: usize) -> Result<usize, MessageError> {
        self.body.len().checked_sub(len).ok_or(MessageError::Truncated {
            needed: len,
            available: self.body.len(),
        })
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// What kind of data a transfer carries. Only files today; the byte is on
/// the wire so the set can grow without reframing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    File = 0,
}

impl TryFrom<u8> for PayloadType {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PayloadType::File),
            other => Err(MessageError::UnknownPayloadType(other)),
        }
    }
}

impl From<PayloadType> for u8 {
    fn from(value: PayloadType) -> u8 {
        value as u8
    }
}

/// Short human-shareable string naming a pending transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePhrase {
    pub code: String,
}

impl CodePhrase {
    pub fn new(code: impl Into<String>) -> Result<Self, MessageError> {
        let code = code.into();
        if code.len() > u8::MAX as usize {
            return Err(MessageError::FieldTooLong { field: "code phrase", len: code.len() });
        }
        Ok(Self { code })
    }

    pub fn push_onto(&self, msg: &mut Message) {
        msg.push_bytes(self.code.as_bytes());
        msg.push_u8(self.code.len() as u8);
    }

    pub fn pop_from(msg: &mut Message) -> Result<Self, MessageError> {
        let len = msg.pop_u8()? as usize;
        let raw = msg.pop_bytes(len)?;
        let code = String::from_utf8(raw).map_err(|_| MessageError::BadUtf8("code phrase"))?;
        Ok(Self { code })
    }

    pub fn to_message(&self, id: MsgId) -> Message {
        let mut msg = Message::new(id);
        self.push_onto(&mut msg);
        msg
    }
}

/// Name and declared length of the file behind a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub file_size: u64,
    pub file_name: String,
}

impl FileData {
    pub fn new(file_size: u64, file_name: impl Into<String>) -> Result<Self, MessageError> {
        let file_name = file_name.into();
        if file_name.len() > u8::MAX as usize {
            return Err(MessageError::FieldTooLong { field: "file name", len: file_name.len() });
        }
        Ok(Self { file_size, file_name })
    }

    pub fn push_onto(&self, msg: &mut Message) {
        msg.push_bytes(self.file_name.as_bytes());
        msg.push_u8(self.file_name.len() as u8);
        msg.push_u64(self.file_size);
    }

    pub fn pop_from(msg: &mut Message) -> Result<Self, MessageError> {
        let file_size = msg.pop_u64()?;
        let len = msg.pop_u8()? as usize;
        let raw = msg.pop_bytes(len)?;
        let file_name = String::from_utf8(raw).map_err(|_| MessageError::BadUtf8("file name"))?;
        Ok(Self { file_size, file_name })
    }
}

/// Advertise or request intent, sent by clients before a transfer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreMetadata {
    pub payload_type: PayloadType,
    pub code_phrase: CodePhrase,
    pub file_data: FileData,
}

impl PreMetadata {
    pub fn push_onto(&self, msg: &mut Message) {
        self.file_data.push_onto(msg);
        self.code_phrase.push_onto(msg);
        msg.push_u8(self.payload_type.into());
    }

    pub fn pop_from(msg: &mut Message) -> Result<Self, MessageError> {
        let payload_type = PayloadType::try_from(msg.pop_u8()?)?;
        let code_phrase = CodePhrase::pop_from(msg)?;
        let file_data = FileData::pop_from(msg)?;
        Ok(Self { payload_type, code_phrase, file_data })
    }

    pub fn to_message(&self, id: MsgId) -> Message {
        let mut msg = Message::new(id);
        self.push_onto(&mut msg);
        msg
    }
}

/// The broker's acceptance manifest: the advertise plus the chunk budget
/// every `Chunk` on the relay must respect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMetadata {
    pub payload_type: PayloadType,
    pub max_chunk_size: u64,
    pub code_phrase: CodePhrase,
    pub file_data: FileData,
}

impl PostMetadata {
    pub fn push_onto(&self, msg: &mut Message) {
        self.file_data.push_onto(msg);
        self.code_phrase.push_onto(msg);
        msg.push_u64(self.max_chunk_size);
        msg.push_u8(self.payload_type.into());
    }

    pub fn pop_from(msg: &mut Message) -> Result<Self, MessageError> {
        let payload_type = PayloadType::try_from(msg.pop_u8()?)?;
        let max_chunk_size = msg.pop_u64()?;
        let code_phrase = CodePhrase::pop_from(msg)?;
        let file_data = FileData::pop_from(msg)?;
        Ok(Self { payload_type, max_chunk_size, code_phrase, file_data })
    }

    pub fn to_message(&self, id: MsgId) -> Message {
        let mut msg = Message::new(id);
        self.push_onto(&mut msg);
        msg
    }
}

// ── Chunks ────────────────────────────────────────────────────────────────────

/// Build a `Chunk` message: the raw bytes followed by their SHA-256 digest.
pub fn chunk_message(data: &[u8]) -> Message {
    let mut msg = Message::new(MsgId::Chunk);
    msg.push_bytes(data);
    msg.push_bytes(&sha256_chunk(data));
    msg
}

/// Split a `Chunk` body into its payload bytes and the claimed digest.
/// The claim is returned unverified; callers compare it themselves.
pub fn split_chunk(mut msg: Message) -> Result<(Vec<u8>, [u8; DIGEST_LEN]), MessageError> {
    if msg.body.len() < DIGEST_LEN {
        return Err(MessageError::ChunkTooShort);
    }
    let trailer = msg.pop_bytes(DIGEST_LEN)?;
    let mut claimed = [0u8; DIGEST_LEN];
    claimed.copy_from_slice(&trailer);
    Ok((msg.body, claimed))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
