//! Catch-up then live delivery of a room's events to one participant.
//!
//! ```text
//!  subscribe(from)                     under the room lock
//!  ├── backlog: [Snapshot?] + log[from..next]     (finite, cloned Arcs)
//!  └── receiver: broadcast from `next` onward     (live)
//! ```
//!
//! Both halves are captured in the same critical section, so the backlog ends
//! exactly where the live stream starts: no gaps and no duplicates. A
//! receiver that overflows its buffer yields one [`Delivery::Resync`] and
//! then ends; the participant must discard local state and subscribe again
//! from sequence 0.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::Stream;
use interview_core::{Event, RoomState, Sequence};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::broadcast::AtomicBroadcastStats;

/// One item delivered to a participant, in strictly ascending order.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Folded state of a compacted prefix; replaces any local state.
    Snapshot(Box<RoomState>),
    Event(Arc<Event>),
    /// The server dropped this subscriber; replay from 0 is required.
    Resync,
}

/// Restartable, gap-free event feed for a single participant.
pub struct Subscription {
    room_id: String,
    backlog: VecDeque<Delivery>,
    receiver: Option<broadcast::Receiver<Arc<Event>>>,
    /// Next sequence this subscriber expects.
    next_sequence: Sequence,
    stats: Arc<AtomicBroadcastStats>,
}

impl Subscription {
    pub(crate) fn new(
        room_id: String,
        backlog: VecDeque<Delivery>,
        receiver: broadcast::Receiver<Arc<Event>>,
        next_sequence: Sequence,
        stats: Arc<AtomicBroadcastStats>,
    ) -> Self {
        Self {
            room_id,
            backlog,
            receiver: Some(receiver),
            next_sequence,
            stats,
        }
    }

    /// Next delivery, waiting for a live event if the backlog is drained.
    ///
    /// Returns `None` once the subscription has ended (after a `Resync`, or
    /// when the room is gone). Cancel-safe.
    pub async fn next(&mut self) -> Option<Delivery> {
        if let Some(delivery) = self.backlog.pop_front() {
            return Some(delivery);
        }
        loop {
            let result = self.receiver.as_mut()?.recv().await;
            match result {
                Ok(event) => {
                    if let Some(delivery) = self.accept(event) {
                        return Some(delivery);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Subscriber in room {} lagged by {skipped} events, forcing resync",
                        self.room_id
                    );
                    return Some(self.force_resync());
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`Subscription::next`].
    pub fn try_next(&mut self) -> Option<Delivery> {
        if let Some(delivery) = self.backlog.pop_front() {
            return Some(delivery);
        }
        loop {
            let result = self.receiver.as_mut()?.try_recv();
            match result {
                Ok(event) => {
                    if let Some(delivery) = self.accept(event) {
                        return Some(delivery);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Subscriber in room {} lagged by {skipped} events, forcing resync",
                        self.room_id
                    );
                    return Some(self.force_resync());
                }
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Live events below the cursor were already served from the backlog.
    fn accept(&mut self, event: Arc<Event>) -> Option<Delivery> {
        if event.sequence < self.next_sequence {
            return None;
        }
        if event.sequence > self.next_sequence {
            log::error!(
                "Room {} delivery gap: expected #{}, got #{}",
                self.room_id,
                self.next_sequence,
                event.sequence
            );
            return Some(self.force_resync());
        }
        self.next_sequence = event.sequence + 1;
        Some(Delivery::Event(event))
    }

    fn force_resync(&mut self) -> Delivery {
        self.receiver = None;
        self.backlog.clear();
        self.stats.record_resync();
        Delivery::Resync
    }

    /// Sequence the next delivered event will carry.
    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    /// Deliveries already queued for catch-up.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_ended(&self) -> bool {
        self.receiver.is_none() && self.backlog.is_empty()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Adapt into a `Stream` of deliveries.
    pub fn into_stream(self) -> impl Stream<Item = Delivery> {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|delivery| (delivery, subscription))
        })
    }
}
