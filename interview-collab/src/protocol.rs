//! Binary wire protocol between room clients and the server.
//!
//! Each WebSocket binary frame carries one message:
//! ```text
//! ┌──────────┬───────────────────────────────────────────┐
//! │ encoding │ body                                      │
//! │ 1 byte   │ bincode(ClientMessage | ServerMessage)    │
//! │          │ raw, or LZ4 with prepended size           │
//! └──────────┴───────────────────────────────────────────┘
//! ```
//!
//! Bodies at or above the compression threshold are LZ4-compressed; large
//! join catch-ups and snapshots are where this pays off.
//!
//! Reference: Patterson & Hennessy, Section 5.7 — Data Compression

use interview_core::{CandidateEvent, Event, RoomState, Sequence};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::ExecutionOutput;
use crate::coordinator::ParticipantInfo;
use crate::error::{CreateRoomError, JoinError, RunCodeError, SubmitError};

/// Frame encoding byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameEncoding {
    Raw = 0,
    Lz4 = 1,
}

impl FrameEncoding {
    fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Lz4),
            other => Err(ProtocolError::InvalidFrameEncoding(other)),
        }
    }
}

/// Messages sent by a participant's client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Create a room; `room_id: None` lets the server generate one.
    CreateRoom {
        passkey: String,
        room_id: Option<String>,
    },
    Join {
        room_id: String,
        passkey: String,
        display_name: String,
    },
    Submit {
        request_id: u64,
        candidate: CandidateEvent,
    },
    /// Everything up to `sequence` has been applied locally.
    Ack { sequence: Sequence },
    /// Restart delivery from `from_sequence` (0 after a Resync).
    Resubscribe { from_sequence: Sequence },
    RunCode { request_id: u64 },
    Participants,
    Leave,
    Ping,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    RoomCreated {
        room_id: String,
    },
    CreateRejected(CreateRoomError),
    Joined {
        session_id: Uuid,
        room_id: String,
        display_name: String,
        /// Folded compacted prefix, if any.
        snapshot: Option<RoomState>,
        events: Vec<Event>,
    },
    JoinRejected(JoinError),
    Submitted {
        request_id: u64,
        sequence: Sequence,
    },
    SubmitRejected {
        request_id: u64,
        error: SubmitError,
    },
    /// Live delivery, strictly ascending.
    Event(Event),
    /// Replaces local state; precedes the tail of a resubscription.
    Snapshot(RoomState),
    /// Local state must be discarded and replayed from sequence 0.
    Resync,
    ExecutionResult {
        request_id: u64,
        result: Result<ExecutionOutput, RunCodeError>,
    },
    Participants(Vec<ParticipantInfo>),
    Error(String),
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

/// Serialize a message into a framed binary payload.
pub fn encode_frame<T: Serialize>(message: &T, compression_threshold: usize) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serde::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;

    if body.len() >= compression_threshold {
        let compressed = lz4_flex::compress_prepend_size(&body);
        let mut frame = Vec::with_capacity(compressed.len() + 1);
        frame.push(FrameEncoding::Lz4 as u8);
        frame.extend_from_slice(&compressed);
        Ok(frame)
    } else {
        let mut frame = Vec::with_capacity(body.len() + 1);
        frame.push(FrameEncoding::Raw as u8);
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

/// Deserialize a framed binary payload.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtocolError> {
    let (&header, body) = frame.split_first().ok_or(ProtocolError::EmptyFrame)?;
    let decompressed;
    let body = match FrameEncoding::from_byte(header)? {
        FrameEncoding::Raw => body,
        FrameEncoding::Lz4 => {
            decompressed = lz4_flex::decompress_size_prepended(body)
                .map_err(|e| ProtocolError::DecompressionError(e.to_string()))?;
            &decompressed[..]
        }
    };
    let (message, _) = bincode::serde::decode_from_slice(body, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(message)
}

impl ClientMessage {
    /// Client frames are small; they are never compressed.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self, usize::MAX)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_frame(bytes)
    }
}

impl ServerMessage {
    pub fn encode(&self, compression_threshold: usize) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self, compression_threshold)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_frame(bytes)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    DecompressionError(String),
    EmptyFrame,
    InvalidFrameEncoding(u8),
    UnexpectedMessage(String),
    Rejected(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::DecompressionError(e) => write!(f, "Decompression error: {e}"),
            Self::EmptyFrame => write!(f, "Empty frame"),
            Self::InvalidFrameEncoding(b) => write!(f, "Invalid frame encoding byte {b}"),
            Self::UnexpectedMessage(m) => write!(f, "Unexpected message: {m}"),
            Self::Rejected(reason) => write!(f, "Rejected: {reason}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
