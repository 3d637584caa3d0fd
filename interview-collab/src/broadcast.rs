//! Fan-out of sequenced events to every subscriber of a room.
//!
//! Uses a tokio broadcast channel for O(1) send to all subscribers. Each
//! subscriber gets an independent receiver that buffers up to `capacity`
//! events; a subscriber that falls further behind than that is lagged out
//! and must resync from the log instead of growing memory.
//!
//! The owning coordinator publishes while holding the room lock, so events
//! enter the channel in sequence order.
//!
//! Reference: Patterson & Hennessy, Section 6.4 — Interconnection Networks

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use interview_core::Event;
use tokio::sync::broadcast;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub events_sent: u64,
    pub resyncs_forced: u64,
    pub active_subscribers: usize,
}

/// Lock-free counters behind [`BroadcastStats`].
#[derive(Debug, Default)]
pub(crate) struct AtomicBroadcastStats {
    events_sent: AtomicU64,
    resyncs_forced: AtomicU64,
}

impl AtomicBroadcastStats {
    pub(crate) fn record_resync(&self) {
        self.resyncs_forced.fetch_add(1, Ordering::Relaxed);
    }
}

/// A broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Event>>,
    /// Events buffered per subscriber before it is lagged out
    capacity: usize,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of receivers. Zero subscribers is not an error:
    /// the event is already durable in the log.
    pub fn publish(&self, event: Arc<Event>) -> usize {
        let count = self.sender.send(event).unwrap_or(0);
        self.stats.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// New receiver that sees every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn stats_handle(&self) -> Arc<AtomicBroadcastStats> {
        self.stats.clone()
    }

    /// Lock-free stats snapshot.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            events_sent: self.stats.events_sent.load(Ordering::Relaxed),
            resyncs_forced: self.stats.resyncs_forced.load(Ordering::Relaxed),
            active_subscribers: self.subscriber_count(),
        }
    }
}
