//! Error taxonomy for room operations.
//!
//! None of these are fatal to a room. `InvalidPayload`, `RoomNotFound` and
//! `BadPasskey` leave no side effects; `Timeout` is safe to retry because
//! strokes are keyed by `stroke_id` and other candidates can carry a
//! `client_event_id`. These enums also travel over the wire, so they derive
//! serde.

use interview_core::PayloadError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why `submit` (or `subscribe`/`ack`) did not produce an event.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubmitError {
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),
    #[error("room not found")]
    RoomNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("timed out waiting for the room")]
    Timeout,
}

/// Why a join was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinError {
    #[error("room not found")]
    RoomNotFound,
    #[error("bad passkey")]
    BadPasskey,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("room is full ({limit} participants)")]
    RoomFull { limit: usize },
    #[error("timed out waiting for the room")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateRoomError {
    #[error("passkey must not be empty")]
    InvalidPasskey,
    #[error("room id must not be empty")]
    InvalidRoomId,
    #[error("room {0} already exists")]
    RoomExists(String),
}

/// Failure reported by a [`CodeExecutor`](crate::collaborators::CodeExecutor).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("code execution is not available")]
    Unavailable,
    #[error("execution timed out")]
    Timeout,
    #[error("execution failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunCodeError {
    #[error(transparent)]
    Room(#[from] SubmitError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_error_converts() {
        let err: SubmitError = PayloadError::EmptyChatMessage.into();
        assert_eq!(err, SubmitError::InvalidPayload(PayloadError::EmptyChatMessage));
        assert_eq!(err.to_string(), "invalid payload: chat message is empty");
    }

    #[test]
    fn test_display() {
        assert_eq!(JoinError::BadPasskey.to_string(), "bad passkey");
        assert_eq!(
            JoinError::RoomFull { limit: 2 }.to_string(),
            "room is full (2 participants)"
        );
        assert_eq!(
            RunCodeError::from(ExecutionError::Unavailable).to_string(),
            "code execution is not available"
        );
    }
}
