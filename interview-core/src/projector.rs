//! Panel projectors: pure folds from events to view state.
//!
//! Every projector is deterministic, so replaying a room's log from sequence
//! 0 reproduces exactly the state any participant holds after receiving the
//! same prefix. There is no snapshot protocol beyond the log's own compacted
//! base, which is itself a [`RoomState`].
//!
//! | Panel        | Rule                                             | State size |
//! |--------------|--------------------------------------------------|------------|
//! | Chat         | append in sequence order                         | O(n)       |
//! | Instructions | last writer (highest sequence) wins              | O(1)       |
//! | Code         | last writer (highest sequence) wins              | O(1)       |
//! | Drawing      | distinct strokes since the last `DrawingClear`   | O(strokes) |
//! | Focus        | latest panel per author                          | O(authors) |

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{AuthorId, DrawingStroke, Event, Language, Panel, Payload, Sequence};
use crate::render::StrokeRenderer;

/// Instructions shown until someone edits the instructions panel.
pub const DEFAULT_INSTRUCTIONS: &str = "# Interview Instructions

## Round 1: Technical Discussion (15 mins)
- Walk through a project you are proud of
- Describe a hard problem and how you approached it

## Round 2: Coding Challenge (30 mins)
- Use the Code panel to implement the solution
- Think out loud and ask clarifying questions

## Round 3: System Design (15 mins)
- Use the Drawing panel to sketch the design
- Discuss scalability and trade-offs

All panels are shared with everyone in the room.
";

/// A fold over room events.
pub trait Projector: Default {
    /// Apply one event. Events of other kinds are ignored.
    fn apply(&mut self, event: &Event);

    /// `(prior, event) -> next` form of [`Projector::apply`].
    fn fold(mut self, event: &Event) -> Self {
        self.apply(event);
        self
    }

    /// Build state from scratch by folding `events` in order.
    fn replay<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        events.into_iter().fold(Self::default(), |state, event| state.fold(event))
    }
}

// ───────────────────────────────────────────────────────────────────
// Chat
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLine {
    pub sequence: Sequence,
    pub author_id: AuthorId,
    pub author_name: String,
    pub text: String,
    pub server_timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatProjection {
    lines: Vec<ChatLine>,
}

impl ChatProjection {
    pub fn lines(&self) -> &[ChatLine] {
        &self.lines
    }

    /// Message texts in display order.
    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|line| line.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Projector for ChatProjection {
    fn apply(&mut self, event: &Event) {
        let Payload::ChatMessage(chat) = &event.payload else {
            return;
        };
        // Sequence order is the display order; anything at or below the tail
        // has already been applied.
        if self.lines.last().is_some_and(|last| last.sequence >= event.sequence) {
            return;
        }
        self.lines.push(ChatLine {
            sequence: event.sequence,
            author_id: event.author_id,
            author_name: chat.author_name.clone(),
            text: chat.text.clone(),
            server_timestamp: event.server_timestamp,
        });
    }
}

// ───────────────────────────────────────────────────────────────────
// Code & instructions (last writer wins)
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDocument {
    pub sequence: Sequence,
    pub author_id: AuthorId,
    pub language: Language,
    pub full_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeProjection {
    current: Option<CodeDocument>,
}

impl CodeProjection {
    /// Latest CodeEdit, if any has been made.
    pub fn current(&self) -> Option<&CodeDocument> {
        self.current.as_ref()
    }

    pub fn language(&self) -> Language {
        self.current.as_ref().map_or_else(Language::default, |doc| doc.language)
    }

    /// Current document text, or the starter template before any edit.
    pub fn text(&self) -> &str {
        match &self.current {
            Some(doc) => &doc.full_text,
            None => Language::default().starter_template(),
        }
    }
}

impl Projector for CodeProjection {
    fn apply(&mut self, event: &Event) {
        let Payload::CodeEdit(edit) = &event.payload else {
            return;
        };
        if self.current.as_ref().is_some_and(|doc| doc.sequence >= event.sequence) {
            return;
        }
        self.current = Some(CodeDocument {
            sequence: event.sequence,
            author_id: event.author_id,
            language: edit.language,
            full_text: edit.full_text.clone(),
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionsProjection {
    /// (sequence, full_text) of the latest edit.
    current: Option<(Sequence, String)>,
}

impl InstructionsProjection {
    pub fn text(&self) -> &str {
        match &self.current {
            Some((_, text)) => text,
            None => DEFAULT_INSTRUCTIONS,
        }
    }

    pub fn last_edit(&self) -> Option<Sequence> {
        self.current.as_ref().map(|(sequence, _)| *sequence)
    }

    pub fn is_edited(&self) -> bool {
        self.current.is_some()
    }
}

impl Projector for InstructionsProjection {
    fn apply(&mut self, event: &Event) {
        let Payload::InstructionEdit(edit) = &event.payload else {
            return;
        };
        if self.last_edit().is_some_and(|seq| seq >= event.sequence) {
            return;
        }
        self.current = Some((event.sequence, edit.full_text.clone()));
    }
}

// ───────────────────────────────────────────────────────────────────
// Drawing
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedStroke {
    pub sequence: Sequence,
    pub author_id: AuthorId,
    pub stroke: DrawingStroke,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawingProjection {
    strokes: Vec<PlacedStroke>,
    stroke_ids: HashSet<Uuid>,
    /// Sequence of the most recent clear.
    cleared_at: Option<Sequence>,
}

impl DrawingProjection {
    /// Visible strokes in paint order.
    pub fn strokes(&self) -> &[PlacedStroke] {
        &self.strokes
    }

    pub fn cleared_at(&self) -> Option<Sequence> {
        self.cleared_at
    }

    pub fn contains(&self, stroke_id: &Uuid) -> bool {
        self.stroke_ids.contains(stroke_id)
    }

    /// Repaint the whole canvas through `renderer`.
    pub fn render_to<R: StrokeRenderer + ?Sized>(&self, renderer: &mut R) {
        renderer.clear();
        for placed in &self.strokes {
            renderer.draw_stroke(&placed.stroke);
        }
    }
}

impl Projector for DrawingProjection {
    fn apply(&mut self, event: &Event) {
        match &event.payload {
            Payload::DrawingStroke(stroke) => {
                if self.cleared_at.is_some_and(|seq| seq > event.sequence) {
                    return;
                }
                if !self.stroke_ids.insert(stroke.stroke_id) {
                    return;
                }
                self.strokes.push(PlacedStroke {
                    sequence: event.sequence,
                    author_id: event.author_id,
                    stroke: stroke.clone(),
                });
            }
            Payload::DrawingClear => {
                if self.cleared_at.is_some_and(|seq| seq >= event.sequence) {
                    return;
                }
                self.strokes.clear();
                self.stroke_ids.clear();
                self.cleared_at = Some(event.sequence);
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Panel focus
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusProjection {
    by_author: BTreeMap<AuthorId, (Sequence, Panel)>,
}

impl FocusProjection {
    pub fn panel_of(&self, author: &AuthorId) -> Option<Panel> {
        self.by_author.get(author).map(|(_, panel)| *panel)
    }

    /// Authors currently looking at `panel`.
    pub fn viewers(&self, panel: Panel) -> Vec<AuthorId> {
        self.by_author
            .iter()
            .filter(|(_, (_, p))| *p == panel)
            .map(|(author, _)| *author)
            .collect()
    }
}

impl Projector for FocusProjection {
    fn apply(&mut self, event: &Event) {
        let Payload::PanelFocus { panel } = &event.payload else {
            return;
        };
        let entry = self.by_author.entry(event.author_id).or_insert((event.sequence, *panel));
        if entry.0 <= event.sequence {
            *entry = (event.sequence, *panel);
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Whole room
// ───────────────────────────────────────────────────────────────────

/// Every panel's state, as of `through`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub chat: ChatProjection,
    pub instructions: InstructionsProjection,
    pub code: CodeProjection,
    pub drawing: DrawingProjection,
    pub focus: FocusProjection,
    /// Highest sequence folded in so far.
    through: Option<Sequence>,
}

impl RoomState {
    pub fn through(&self) -> Option<Sequence> {
        self.through
    }

    /// First sequence this state has not seen yet.
    pub fn next_sequence(&self) -> Sequence {
        self.through.map_or(0, |seq| seq + 1)
    }
}

impl Projector for RoomState {
    /// Events at or below `through` are ignored, so redelivery is harmless.
    fn apply(&mut self, event: &Event) {
        if self.through.is_some_and(|seq| seq >= event.sequence) {
            return;
        }
        self.chat.apply(event);
        self.instructions.apply(event);
        self.code.apply(event);
        self.drawing.apply(event);
        self.focus.apply(event);
        self.through = Some(event.sequence);
    }
}
