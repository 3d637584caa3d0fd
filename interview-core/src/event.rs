//! Room events and their payloads.
//!
//! Clients propose [`CandidateEvent`]s; only the room's coordinator turns a
//! candidate into an [`Event`] by assigning it a sequence number. The sequence
//! is the sole order: timestamps ride along for display and are never used to
//! sort.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::current_timestamp;

/// Position of an event in its room's log. Gapless, starting at 0.
pub type Sequence = u64;

/// Identity of whoever authored an event (a participant's session id).
pub type AuthorId = Uuid;

/// Reserved author for automated responders (executor bots, scripted replies).
pub const SYSTEM_AUTHOR: AuthorId = Uuid::nil();

/// Display name stamped on events authored by [`SYSTEM_AUTHOR`].
pub const SYSTEM_AUTHOR_NAME: &str = "System";

/// Upper bound on a single chat message, in bytes.
pub const MAX_CHAT_BYTES: usize = 4 * 1024;

/// Upper bound on code and instruction documents, in bytes.
pub const MAX_DOCUMENT_BYTES: usize = 256 * 1024;

/// Upper bound on points in one stroke.
pub const MAX_STROKE_POINTS: usize = 10_000;

/// Discriminant of an event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ChatMessage,
    InstructionEdit,
    CodeEdit,
    DrawingStroke,
    /// Erases every stroke before it.
    DrawingClear,
    PanelFocus,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ChatMessage => "chat message",
            Self::InstructionEdit => "instruction edit",
            Self::CodeEdit => "code edit",
            Self::DrawingStroke => "drawing stroke",
            Self::DrawingClear => "drawing clear",
            Self::PanelFocus => "panel focus",
        };
        f.write_str(name)
    }
}

/// The four panels of an interview room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Panel {
    Chat,
    Instructions,
    Code,
    Drawing,
}

/// Editor languages offered in the code panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Java,
    Cpp,
    Html,
    Css,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::Html,
        Language::Css,
    ];

    /// Lowercase identifier used by editors and executors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Python => "python",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::Html => "html",
            Self::Css => "css",
        }
    }

    /// Document shown before anyone has edited the code panel.
    pub fn starter_template(&self) -> &'static str {
        match self {
            Self::JavaScript => "// JavaScript\nfunction solve(input) {\n  return input;\n}\n\nconsole.log(solve(\"hello\"));\n",
            Self::TypeScript => "// TypeScript\nfunction solve(input: string): string {\n  return input;\n}\n\nconsole.log(solve(\"hello\"));\n",
            Self::Python => "# Python\ndef solve(value):\n    return value\n\nprint(solve(\"hello\"))\n",
            Self::Java => "// Java\npublic class Main {\n    public static void main(String[] args) {\n        System.out.println(\"hello\");\n    }\n}\n",
            Self::Cpp => "// C++\n#include <iostream>\n\nint main() {\n    std::cout << \"hello\" << std::endl;\n    return 0;\n}\n",
            Self::Html => "<!DOCTYPE html>\n<html>\n<head>\n  <title>Interview</title>\n</head>\n<body>\n  <h1>hello</h1>\n</body>\n</html>\n",
            Self::Css => "/* CSS */\nbody {\n  font-family: sans-serif;\n  margin: 0 auto;\n}\n",
        }
    }

    /// Parse the lowercase identifier produced by [`Language::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lang| lang.as_str() == name)
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::JavaScript
    }
}

/// Canvas-normalized coordinate; both axes are in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn in_unit_square(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && (0.0..=1.0).contains(&self.x)
            && (0.0..=1.0).contains(&self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Stamped by the coordinator from the author's session.
    pub author_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionEdit {
    pub full_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEdit {
    pub language: Language,
    pub full_text: String,
}

/// One freehand stroke. `stroke_id` is generated by the client and makes
/// resubmission of the same stroke idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingStroke {
    pub stroke_id: Uuid,
    pub points: Vec<Point>,
    /// CSS-style color string, e.g. `#FF0000`.
    pub color: String,
    pub width: f32,
}

impl DrawingStroke {
    pub fn new(points: Vec<Point>, color: impl Into<String>, width: f32) -> Self {
        Self {
            stroke_id: Uuid::new_v4(),
            points,
            color: color.into(),
            width,
        }
    }
}

/// Kind-specific event content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    ChatMessage(ChatMessage),
    InstructionEdit(InstructionEdit),
    CodeEdit(CodeEdit),
    DrawingStroke(DrawingStroke),
    DrawingClear,
    PanelFocus { panel: Panel },
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ChatMessage(_) => EventKind::ChatMessage,
            Self::InstructionEdit(_) => EventKind::InstructionEdit,
            Self::CodeEdit(_) => EventKind::CodeEdit,
            Self::DrawingStroke(_) => EventKind::DrawingStroke,
            Self::DrawingClear => EventKind::DrawingClear,
            Self::PanelFocus { .. } => EventKind::PanelFocus,
        }
    }
}

/// Why a candidate event was rejected. Rejection never changes room state.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadError {
    #[error("chat message is empty")]
    EmptyChatMessage,
    #[error("stroke has no points")]
    EmptyStroke,
    #[error("stroke has {count} points, limit is {limit}")]
    TooManyPoints { count: usize, limit: usize },
    #[error("stroke point {index} is outside the unit canvas")]
    PointOutOfBounds { index: usize },
    #[error("stroke width must be a positive number")]
    InvalidStrokeWidth,
    #[error("stroke color is empty")]
    EmptyColor,
    #[error("{kind} exceeds {limit} bytes")]
    TooLarge { kind: EventKind, limit: usize },
}

/// An event proposed by a client. It has no sequence until the coordinator
/// appends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub payload: Payload,
    pub client_timestamp: u64,
    /// Optional caller-chosen dedup key. Resubmitting a candidate with a key
    /// the room has already seen returns the original event.
    pub client_event_id: Option<Uuid>,
}

impl CandidateEvent {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            client_timestamp: current_timestamp(),
            client_event_id: None,
        }
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::new(Payload::ChatMessage(ChatMessage {
            author_name: String::new(),
            text: text.into(),
        }))
    }

    pub fn instructions(full_text: impl Into<String>) -> Self {
        Self::new(Payload::InstructionEdit(InstructionEdit {
            full_text: full_text.into(),
        }))
    }

    pub fn code(language: Language, full_text: impl Into<String>) -> Self {
        Self::new(Payload::CodeEdit(CodeEdit {
            language,
            full_text: full_text.into(),
        }))
    }

    pub fn stroke(stroke: DrawingStroke) -> Self {
        Self::new(Payload::DrawingStroke(stroke))
    }

    pub fn clear_drawing() -> Self {
        Self::new(Payload::DrawingClear)
    }

    pub fn focus(panel: Panel) -> Self {
        Self::new(Payload::PanelFocus { panel })
    }

    /// Attach a dedup key so retries after an ambiguous failure are safe.
    pub fn with_client_event_id(mut self, id: Uuid) -> Self {
        self.client_event_id = Some(id);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Key under which the room remembers this candidate for idempotent
    /// replay. Strokes are keyed by `stroke_id`; anything else only if the
    /// caller supplied a `client_event_id`.
    pub fn dedup_key(&self) -> Option<Uuid> {
        match &self.payload {
            Payload::DrawingStroke(stroke) => Some(stroke.stroke_id),
            _ => self.client_event_id,
        }
    }

    /// Check the payload and normalise it (chat text is trimmed).
    pub fn validate(mut self) -> Result<Self, PayloadError> {
        match &mut self.payload {
            Payload::ChatMessage(chat) => {
                let trimmed = chat.text.trim();
                if trimmed.is_empty() {
                    return Err(PayloadError::EmptyChatMessage);
                }
                if trimmed.len() > MAX_CHAT_BYTES {
                    return Err(PayloadError::TooLarge {
                        kind: EventKind::ChatMessage,
                        limit: MAX_CHAT_BYTES,
                    });
                }
                if trimmed.len() != chat.text.len() {
                    chat.text = trimmed.to_string();
                }
            }
            Payload::InstructionEdit(edit) => {
                if edit.full_text.len() > MAX_DOCUMENT_BYTES {
                    return Err(PayloadError::TooLarge {
                        kind: EventKind::InstructionEdit,
                        limit: MAX_DOCUMENT_BYTES,
                    });
                }
            }
            Payload::CodeEdit(edit) => {
                if edit.full_text.len() > MAX_DOCUMENT_BYTES {
                    return Err(PayloadError::TooLarge {
                        kind: EventKind::CodeEdit,
                        limit: MAX_DOCUMENT_BYTES,
                    });
                }
            }
            Payload::DrawingStroke(stroke) => validate_stroke(stroke)?,
            Payload::DrawingClear | Payload::PanelFocus { .. } => {}
        }
        Ok(self)
    }
}

fn validate_stroke(stroke: &DrawingStroke) -> Result<(), PayloadError> {
    if stroke.points.is_empty() {
        return Err(PayloadError::EmptyStroke);
    }
    if stroke.points.len() > MAX_STROKE_POINTS {
        return Err(PayloadError::TooManyPoints {
            count: stroke.points.len(),
            limit: MAX_STROKE_POINTS,
        });
    }
    if let Some(index) = stroke.points.iter().position(|p| !p.in_unit_square()) {
        return Err(PayloadError::PointOutOfBounds { index });
    }
    if !stroke.width.is_finite() || stroke.width <= 0.0 {
        return Err(PayloadError::InvalidStrokeWidth);
    }
    if stroke.color.trim().is_empty() {
        return Err(PayloadError::EmptyColor);
    }
    Ok(())
}

/// A finalized, immutable room event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned exactly once, by the coordinator.
    pub sequence: Sequence,
    pub room_id: String,
    pub author_id: AuthorId,
    pub payload: Payload,
    pub client_timestamp: u64,
    pub server_timestamp: u64,
    pub client_event_id: Option<Uuid>,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn is_system(&self) -> bool {
        self.author_id == SYSTEM_AUTHOR
    }
}
