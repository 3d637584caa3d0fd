//! # interview-core — Event model and panel projections for interview rooms
//!
//! Every participant action in a room (chat, instruction edits, code edits,
//! drawing strokes, panel focus) becomes an immutable, sequence-numbered
//! [`Event`]. The [`EventLog`] is the only source of truth; panel state is
//! always derived by folding the log with the projectors in [`projector`].
//!
//! ## Architecture
//!
//! ```text
//! CandidateEvent ──validate──► EventLog::append ──► Event { sequence }
//!                                    │
//!                                    ▼
//!                      ┌─────────────┼──────────────┬─────────────┐
//!                      ▼             ▼              ▼             ▼
//!               ChatProjection  CodeProjection  DrawingProjection  …
//!                      └─────────────┴──────┬───────┴─────────────┘
//!                                           ▼
//!                                       RoomState
//! ```
//!
//! ## Modules
//!
//! - [`event`] — Event, CandidateEvent and the per-kind payloads
//! - [`event_log`] — append-only, gapless, strictly ordered log per room
//! - [`projector`] — pure folds from events to panel state
//! - [`render`] — the opaque stroke renderer collaborator
//!
//! This crate has no async runtime; the coordinator that serializes appends
//! lives in `interview-collab`.

pub mod event;
pub mod event_log;
pub mod projector;
pub mod render;

pub use event::{
    AuthorId, CandidateEvent, ChatMessage, CodeEdit, DrawingStroke, Event, EventKind,
    InstructionEdit, Language, Panel, Payload, PayloadError, Point, Sequence, SYSTEM_AUTHOR,
    SYSTEM_AUTHOR_NAME,
};
pub use event_log::{EventLog, LogError};
pub use projector::{
    ChatLine, ChatProjection, CodeDocument, CodeProjection, DrawingProjection, FocusProjection,
    InstructionsProjection, PlacedStroke, Projector, RoomState, DEFAULT_INSTRUCTIONS,
};
pub use render::StrokeRenderer;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch.
///
/// Timestamps are informational only; ordering always comes from sequence
/// numbers.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
