//! Append-only event log for a single room.
//!
//! ```text
//!   base (folded)      retained events
//! ┌──────────────┐ ┌────┬────┬────┬────┐
//! │ RoomState@41 │ │ 42 │ 43 │ 44 │ 45 │  next_sequence = 46
//! └──────────────┘ └────┴────┴────┴────┘
//!                    ▲
//!                    first_sequence
//! ```
//!
//! Sequence numbers are assigned here and nowhere else: gapless, starting at
//! 0, strictly increasing in append order. Events are never mutated or
//! removed individually. Retention may fold a fully acknowledged prefix into
//! the `base` snapshot, which keeps late joiners able to reconstruct state.
//!
//! The log itself is not synchronized; the coordinator owning it is the
//! single writer.
//!
//! Reference: Kleppmann — DDIA, Chapter 11 (Log-based Message Brokers)

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::current_timestamp;
use crate::event::{AuthorId, CandidateEvent, Event, EventKind, Sequence};
use crate::projector::{Projector, RoomState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The requested prefix was folded into the base snapshot.
    #[error("events before {first_retained} were compacted")]
    Compacted { first_retained: Sequence },
}

/// What the dedup index remembers about a keyed event. No payload, so
/// compacted events are really freed.
#[derive(Debug, Clone, Copy)]
struct Receipt {
    sequence: Sequence,
    kind: EventKind,
    author_id: AuthorId,
    client_timestamp: u64,
    server_timestamp: u64,
    client_event_id: Option<Uuid>,
}

impl Receipt {
    fn of(event: &Event) -> Self {
        Self {
            sequence: event.sequence,
            kind: event.kind(),
            author_id: event.author_id,
            client_timestamp: event.client_timestamp,
            server_timestamp: event.server_timestamp,
            client_event_id: event.client_event_id,
        }
    }
}

/// Strictly ordered event sequence for one room.
pub struct EventLog {
    room_id: String,
    /// Retained events; `events[i].sequence == first_sequence + i`.
    events: VecDeque<Arc<Event>>,
    first_sequence: Sequence,
    next_sequence: Sequence,
    /// Fold of every event before `first_sequence`.
    base: RoomState,
    /// Dedup keys (stroke ids, client event ids) for the room's lifetime.
    seen: HashMap<Uuid, Receipt>,
}

impl EventLog {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            events: VecDeque::new(),
            first_sequence: 0,
            next_sequence: 0,
            base: RoomState::default(),
            seen: HashMap::new(),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Append a validated candidate, assigning the next sequence number.
    pub fn append(&mut self, author_id: AuthorId, candidate: CandidateEvent) -> Arc<Event> {
        let dedup_key = candidate.dedup_key();
        let event = Arc::new(Event {
            sequence: self.next_sequence,
            room_id: self.room_id.clone(),
            author_id,
            payload: candidate.payload,
            client_timestamp: candidate.client_timestamp,
            server_timestamp: current_timestamp(),
            client_event_id: candidate.client_event_id,
        });
        self.next_sequence += 1;

        if let Some(key) = dedup_key {
            self.seen.insert(key, Receipt::of(&event));
        }
        self.events.push_back(event.clone());

        log::trace!(
            "Room {} appended {} #{}",
            self.room_id,
            event.kind(),
            event.sequence
        );
        event
    }

    /// The event previously appended under the candidate's dedup key, if any.
    ///
    /// A retained original is returned as is. A compacted one is rebuilt from
    /// its receipt with the retried candidate's payload, which a retry
    /// repeats verbatim.
    pub fn find_duplicate(&self, candidate: &CandidateEvent) -> Option<Arc<Event>> {
        let receipt = self.seen.get(&candidate.dedup_key()?)?;
        if let Some(event) = self.get(receipt.sequence) {
            return Some(event.clone());
        }
        if receipt.kind != candidate.kind() {
            log::warn!(
                "Room {}: dedup key of #{} reused by a {}",
                self.room_id,
                receipt.sequence,
                candidate.kind()
            );
        }
        Some(Arc::new(Event {
            sequence: receipt.sequence,
            room_id: self.room_id.clone(),
            author_id: receipt.author_id,
            payload: candidate.payload.clone(),
            client_timestamp: receipt.client_timestamp,
            server_timestamp: receipt.server_timestamp,
            client_event_id: receipt.client_event_id,
        }))
    }

    /// All retained events with `sequence >= from`, ascending.
    ///
    /// The iterator is finite as of the call; call again to pick up newer
    /// events. Asking for a compacted prefix is an error so callers can fall
    /// back to [`EventLog::base`].
    pub fn read_from(
        &self,
        from: Sequence,
    ) -> Result<impl Iterator<Item = &Arc<Event>> + '_, LogError> {
        if from < self.first_sequence {
            return Err(LogError::Compacted {
                first_retained: self.first_sequence,
            });
        }
        let start = ((from - self.first_sequence) as usize).min(self.events.len());
        Ok(self.events.range(start..))
    }

    pub fn get(&self, sequence: Sequence) -> Option<&Arc<Event>> {
        if sequence < self.first_sequence {
            return None;
        }
        self.events.get((sequence - self.first_sequence) as usize)
    }

    pub fn last(&self) -> Option<&Arc<Event>> {
        self.events.back()
    }

    /// Sequence the next append will receive. Also the total number of
    /// events ever appended.
    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    /// Oldest retained sequence.
    pub fn first_sequence(&self) -> Sequence {
        self.first_sequence
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Snapshot of everything before [`EventLog::first_sequence`].
    pub fn base(&self) -> &RoomState {
        &self.base
    }

    /// Fold retained events `< keep_from` into the base snapshot.
    ///
    /// Returns how many events were folded. Never touches events at or after
    /// `keep_from`, and never changes what [`EventLog::replay`] produces.
    pub fn compact_before(&mut self, keep_from: Sequence) -> usize {
        let mut folded = 0;
        while let Some(front) = self.events.front() {
            if front.sequence >= keep_from {
                break;
            }
            if let Some(event) = self.events.pop_front() {
                self.base.apply(&event);
                self.first_sequence = event.sequence + 1;
                folded += 1;
            }
        }
        if folded > 0 {
            log::debug!(
                "Room {} compacted {folded} events, first retained #{}",
                self.room_id,
                self.first_sequence
            );
        }
        folded
    }

    /// Full room state: base snapshot plus every retained event.
    pub fn replay(&self) -> RoomState {
        let mut state = self.base.clone();
        for event in &self.events {
            state.apply(event);
        }
        state
    }
}
