//! Per-room session coordinator: the single writer of a room's event log.
//!
//! Architecture:
//! ```text
//! submit(A) ──┐                       ┌──► Subscription (A)
//! submit(B) ──┼──► Mutex<RoomInner> ──┼──► Subscription (B)
//! join / ack ─┘     ├── EventLog      └──► Subscription (C)
//!                   ├── participants        (BroadcastGroup)
//!                   └── cached RoomState
//! ```
//!
//! Every mutation of a room (append, join, leave, ack, eviction) goes through
//! one `tokio::sync::Mutex`. That lock is the serialization point that gives
//! the room its total order; different rooms have different locks and never
//! contend. Waiting for the lock is bounded by `operation_timeout` and is
//! cancel-safe, so a participant that disconnects mid-wait never stalls the
//! others.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 9
//! (Total Order Broadcast)

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use interview_core::{
    AuthorId, CandidateEvent, Event, EventLog, Payload, Projector, RoomState, Sequence,
    SYSTEM_AUTHOR, SYSTEM_AUTHOR_NAME,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, BroadcastStats};
use crate::collaborators::{CodeExecutor, ExecutionOutput, ExecutionRequest};
use crate::config::CoordinatorConfig;
use crate::error::{ExecutionError, JoinError, RunCodeError, SubmitError};
use crate::subscription::{Delivery, Subscription};

/// Public view of a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub session_id: Uuid,
    pub display_name: String,
    pub joined_at: u64,
    /// Highest sequence this participant has acknowledged.
    pub last_acked: Option<Sequence>,
}

/// Everything a new participant needs to reconstruct the room.
pub struct CatchUp {
    /// Fold of the compacted prefix, if retention has compacted anything.
    pub snapshot: Option<RoomState>,
    /// Retained events, ascending.
    pub events: Vec<Arc<Event>>,
    /// Live feed continuing right after `events`.
    pub subscription: Subscription,
}

/// Coordinator statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorStats {
    pub events_appended: u64,
    pub retained_events: usize,
    pub first_retained: Sequence,
    pub participants: usize,
    pub broadcast: BroadcastStats,
}

struct RoomInner {
    log: EventLog,
    participants: HashMap<Uuid, ParticipantInfo>,
    /// Latest projection; a cache, never the source of truth.
    projection: RoomState,
    /// When the last participant left.
    empty_since: Option<Instant>,
    /// Set once the room is evicted; every later operation sees RoomNotFound.
    closed: bool,
}

impl RoomInner {
    fn append(&mut self, author_id: AuthorId, candidate: CandidateEvent) -> Arc<Event> {
        let event = self.log.append(author_id, candidate);
        self.projection.apply(&event);
        event
    }

    /// Lowest sequence some current participant still has not acknowledged.
    fn ack_floor(&self) -> Sequence {
        self.participants
            .values()
            .map(|p| p.last_acked.map_or(0, |seq| seq + 1))
            .min()
            .unwrap_or_else(|| self.log.next_sequence())
    }

    fn catch_up_from(&self, from: Sequence) -> VecDeque<Delivery> {
        let mut backlog = VecDeque::new();
        let start = if from < self.log.first_sequence() {
            backlog.push_back(Delivery::Snapshot(Box::new(self.log.base().clone())));
            self.log.first_sequence()
        } else {
            from
        };
        if let Ok(events) = self.log.read_from(start) {
            backlog.extend(events.cloned().map(Delivery::Event));
        }
        backlog
    }
}

/// Owner of one room's event log.
pub struct SessionCoordinator {
    room_id: String,
    config: CoordinatorConfig,
    inner: Mutex<RoomInner>,
    broadcast: BroadcastGroup,
}

impl SessionCoordinator {
    pub fn new(room_id: impl Into<String>, config: CoordinatorConfig) -> Self {
        let room_id = room_id.into();
        let broadcast = BroadcastGroup::new(config.participant_buffer);
        Self {
            inner: Mutex::new(RoomInner {
                log: EventLog::new(room_id.clone()),
                participants: HashMap::new(),
                projection: RoomState::default(),
                empty_since: Some(Instant::now()),
                closed: false,
            }),
            room_id,
            config,
            broadcast,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Acquire the room's serialization point, bounded by the timeout.
    async fn lock(&self) -> Option<MutexGuard<'_, RoomInner>> {
        tokio::time::timeout(self.config.operation_timeout, self.inner.lock())
            .await
            .ok()
    }

    async fn lock_open(&self) -> Result<MutexGuard<'_, RoomInner>, SubmitError> {
        let inner = self.lock().await.ok_or(SubmitError::Timeout)?;
        if inner.closed {
            return Err(SubmitError::RoomNotFound);
        }
        Ok(inner)
    }

    /// Admit a participant and hand back the full catch-up plus a live feed.
    pub async fn join(&self, session_id: Uuid, display_name: String) -> Result<CatchUp, JoinError> {
        let mut inner = self.lock().await.ok_or(JoinError::Timeout)?;
        if inner.closed {
            return Err(JoinError::RoomNotFound);
        }
        if inner.participants.len() >= self.config.max_participants {
            return Err(JoinError::RoomFull {
                limit: self.config.max_participants,
            });
        }

        inner.participants.insert(
            session_id,
            ParticipantInfo {
                session_id,
                display_name: display_name.clone(),
                joined_at: interview_core::current_timestamp(),
                last_acked: None,
            },
        );
        inner.empty_since = None;

        let (snapshot, events) = {
            let snapshot = (inner.log.first_sequence() > 0).then(|| inner.log.base().clone());
            let events: Vec<Arc<Event>> = inner
                .log
                .read_from(inner.log.first_sequence())
                .map(|iter| iter.cloned().collect())
                .unwrap_or_default();
            (snapshot, events)
        };
        let subscription = Subscription::new(
            self.room_id.clone(),
            VecDeque::new(),
            self.broadcast.subscribe(),
            inner.log.next_sequence(),
            self.broadcast.stats_handle(),
        );

        log::info!(
            "{display_name} ({session_id}) joined room {} at #{} ({} participants)",
            self.room_id,
            inner.log.next_sequence(),
            inner.participants.len()
        );

        Ok(CatchUp {
            snapshot,
            events,
            subscription,
        })
    }

    /// Validate, sequence and broadcast a participant's candidate event.
    ///
    /// A candidate whose dedup key (stroke id or client event id) was already
    /// seen in this room returns the original event and appends nothing.
    pub async fn submit(
        &self,
        author_id: AuthorId,
        candidate: CandidateEvent,
    ) -> Result<Arc<Event>, SubmitError> {
        let candidate = candidate.validate()?;

        let mut inner = self.lock_open().await?;
        let author_name = if author_id == SYSTEM_AUTHOR {
            SYSTEM_AUTHOR_NAME.to_string()
        } else {
            inner
                .participants
                .get(&author_id)
                .map(|p| p.display_name.clone())
                .ok_or(SubmitError::SessionNotFound)?
        };
        let candidate = stamp_author_name(candidate, author_name);

        if let Some(original) = inner.log.find_duplicate(&candidate) {
            log::debug!(
                "Room {}: duplicate {} from {author_id} resolved to #{}",
                self.room_id,
                original.kind(),
                original.sequence
            );
            return Ok(original);
        }

        let event = inner.append(author_id, candidate);
        let receivers = self.broadcast.publish(event.clone());
        log::debug!(
            "Room {}: #{} {} by {author_id} -> {receivers} subscribers",
            self.room_id,
            event.sequence,
            event.kind()
        );

        self.compact(&mut inner);
        Ok(event)
    }

    /// Inject an event from an automated responder under the system author.
    pub async fn submit_system(&self, candidate: CandidateEvent) -> Result<Arc<Event>, SubmitError> {
        self.submit(SYSTEM_AUTHOR, candidate).await
    }

    /// Replay every event from `from` onward, then continue live.
    ///
    /// If `from` falls inside the compacted prefix the feed starts with a
    /// [`Delivery::Snapshot`] of that prefix.
    pub async fn subscribe(&self, from: Sequence) -> Result<Subscription, SubmitError> {
        let inner = self.lock_open().await?;
        let backlog = inner.catch_up_from(from);
        let next = inner.log.next_sequence().max(from);
        Ok(Subscription::new(
            self.room_id.clone(),
            backlog,
            self.broadcast.subscribe(),
            next,
            self.broadcast.stats_handle(),
        ))
    }

    /// Advance a participant's acknowledgement watermark. Never moves it back
    /// and never past the last appended event.
    pub async fn ack(&self, session_id: Uuid, sequence: Sequence) -> Result<Option<Sequence>, SubmitError> {
        let mut inner = self.lock_open().await?;
        let last = inner.log.next_sequence().checked_sub(1);
        let participant = inner
            .participants
            .get_mut(&session_id)
            .ok_or(SubmitError::SessionNotFound)?;
        let Some(last) = last else {
            return Ok(None);
        };
        let target = sequence.min(last);
        if participant.last_acked.map_or(true, |acked| target > acked) {
            participant.last_acked = Some(target);
        }
        let acked = participant.last_acked;
        self.compact(&mut inner);
        Ok(acked)
    }

    /// Remove a participant. Returns `false` if it was not in the room.
    pub async fn leave(&self, session_id: Uuid) -> bool {
        // Leaving must not be lost to a busy room, so wait without a timeout.
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.participants.remove(&session_id) else {
            return false;
        };
        if inner.participants.is_empty() {
            inner.empty_since = Some(Instant::now());
        }
        log::info!(
            "{} ({session_id}) left room {} ({} remaining)",
            info.display_name,
            self.room_id,
            inner.participants.len()
        );
        true
    }

    /// Close the room if it has been empty for at least the idle grace
    /// period. Closing discards the event log; it is the only destructive
    /// operation on a room.
    pub async fn close_if_idle(&self) -> bool {
        let Some(mut inner) = self.lock().await else {
            return false;
        };
        if inner.closed {
            return true;
        }
        let idle = inner.participants.is_empty()
            && inner
                .empty_since
                .is_some_and(|since| since.elapsed() >= self.config.idle_grace);
        if !idle {
            return false;
        }
        let discarded = inner.log.next_sequence();
        inner.closed = true;
        inner.log = EventLog::new(self.room_id.clone());
        inner.projection = RoomState::default();
        log::info!("Room {} evicted after idle grace, discarded {discarded} events", self.room_id);
        true
    }

    /// When an empty room becomes eligible for eviction.
    pub async fn idle_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().await;
        if inner.closed || !inner.participants.is_empty() {
            return None;
        }
        inner.empty_since.map(|since| since + self.config.idle_grace)
    }

    /// Hand the current code document to `executor`. The output goes back
    /// to the caller and is never appended to the log.
    pub async fn run_code(
        &self,
        session_id: Uuid,
        executor: &dyn CodeExecutor,
    ) -> Result<ExecutionOutput, RunCodeError> {
        let request = {
            let inner = self.lock_open().await?;
            if !inner.participants.contains_key(&session_id) {
                return Err(SubmitError::SessionNotFound.into());
            }
            ExecutionRequest {
                room_id: self.room_id.clone(),
                requested_by: session_id,
                language: inner.projection.code.language(),
                source: inner.projection.code.text().to_string(),
            }
        };

        log::debug!(
            "Room {}: running {} for {session_id}",
            self.room_id,
            request.language.as_str()
        );
        match tokio::time::timeout(self.config.execution_timeout, executor.execute(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExecutionError::Timeout.into()),
        }
    }

    /// Current participants, ordered by join time.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        let inner = self.inner.lock().await;
        let mut list: Vec<ParticipantInfo> = inner.participants.values().cloned().collect();
        list.sort_by_key(|p| (p.joined_at, p.session_id));
        list
    }

    pub async fn participant_count(&self) -> usize {
        self.inner.lock().await.participants.len()
    }

    pub async fn has_participant(&self, session_id: &Uuid) -> bool {
        self.inner.lock().await.participants.contains_key(session_id)
    }

    /// Total events ever appended.
    pub async fn event_count(&self) -> u64 {
        self.inner.lock().await.log.next_sequence()
    }

    /// Cached projection of the whole room.
    pub async fn state(&self) -> RoomState {
        self.inner.lock().await.projection.clone()
    }

    /// Omniscient replay of the log (base snapshot plus retained events).
    pub async fn replay(&self) -> RoomState {
        self.inner.lock().await.log.replay()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let inner = self.inner.lock().await;
        CoordinatorStats {
            events_appended: inner.log.next_sequence(),
            retained_events: inner.log.len(),
            first_retained: inner.log.first_sequence(),
            participants: inner.participants.len(),
            broadcast: self.broadcast.stats(),
        }
    }

    /// Fold acknowledged history into the log's base once the retained log
    /// exceeds the configured cap.
    fn compact(&self, inner: &mut RoomInner) {
        let Some(cap) = self.config.retained_events else {
            return;
        };
        if inner.log.len() <= cap {
            return;
        }
        let over_cap = inner.log.next_sequence() - cap as Sequence;
        let keep_from = over_cap.min(inner.ack_floor());
        inner.log.compact_before(keep_from);
    }
}

fn stamp_author_name(mut candidate: CandidateEvent, author_name: String) -> CandidateEvent {
    if let Payload::ChatMessage(chat) = &mut candidate.payload {
        chat.author_name = author_name;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::future::BoxFuture;
    use futures_util::StreamExt;
    use interview_core::{DrawingStroke, Language, Panel, PayloadError, Point};

    fn coordinator() -> SessionCoordinator {
        SessionCoordinator::new("r1", CoordinatorConfig::for_testing())
    }

    fn stroke() -> DrawingStroke {
        DrawingStroke::new(vec![Point::new(0.1, 0.2), Point::new(0.3, 0.4)], "#000000", 2.0)
    }

    fn event_of(delivery: Option<Delivery>) -> Arc<Event> {
        match delivery {
            Some(Delivery::Event(event)) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    async fn join(coord: &SessionCoordinator, name: &str) -> (Uuid, CatchUp) {
        let id = Uuid::new_v4();
        let catch_up = coord.join(id, name.to_string()).await.unwrap();
        (id, catch_up)
    }

    #[tokio::test]
    async fn test_two_participants_converge() {
        let coord = coordinator();
        let (a, mut a_join) = join(&coord, "Alice").await;
        let hi = coord.submit(a, CandidateEvent::chat("hi")).await.unwrap();
        assert_eq!(hi.sequence, 0);

        let (b, b_join) = join(&coord, "Bob").await;
        assert_eq!(b_join.events.len(), 1);
        let hello = coord.submit(b, CandidateEvent::chat("hello")).await.unwrap();
        assert_eq!(hello.sequence, 1);

        // A saw both live; B got "hi" in catch-up and "hello" live
        let mut a_state = RoomState::default();
        a_state.apply(&event_of(a_join.subscription.next().await));
        a_state.apply(&event_of(a_join.subscription.next().await));

        let mut b_state = RoomState::default();
        let mut b_sub = b_join.subscription;
        for event in &b_join.events {
            b_state.apply(event);
        }
        b_state.apply(&event_of(b_sub.next().await));

        assert_eq!(a_state.chat.texts(), vec!["hi", "hello"]);
        assert_eq!(a_state, b_state);
        assert_eq!(a_state.chat.lines()[0].author_name, "Alice");
        assert_eq!(a_state.chat.lines()[1].author_name, "Bob");
    }

    #[tokio::test]
    async fn test_empty_chat_rejected_without_side_effects() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        let err = coord.submit(a, CandidateEvent::chat("   ")).await.unwrap_err();
        assert_eq!(err, SubmitError::InvalidPayload(PayloadError::EmptyChatMessage));
        assert_eq!(coord.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_stroke_retry_is_idempotent() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        let candidate = CandidateEvent::stroke(stroke());

        let first = coord.submit(a, candidate.clone()).await.unwrap();
        let state_before = coord.state().await;
        let retry = coord.submit(a, candidate).await.unwrap();

        assert_eq!(first, retry);
        assert_eq!(coord.event_count().await, 1);
        assert_eq!(coord.state().await, state_before);
        assert_eq!(coord.state().await.drawing.strokes().len(), 1);
    }

    #[tokio::test]
    async fn test_client_event_id_dedup() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        let key = Uuid::new_v4();
        let candidate = CandidateEvent::code(Language::Python, "print(1)").with_client_event_id(key);

        let first = coord.submit(a, candidate.clone()).await.unwrap();
        let second = coord.submit(a, candidate).await.unwrap();
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(coord.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_author_rejected() {
        let coord = coordinator();
        let err = coord
            .submit(Uuid::new_v4(), CandidateEvent::chat("hi"))
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::SessionNotFound);
    }

    #[tokio::test]
    async fn test_system_author() {
        let coord = coordinator();
        let event = coord
            .submit_system(CandidateEvent::chat("Welcome to room r1!"))
            .await
            .unwrap();
        assert!(event.is_system());
        assert_eq!(coord.state().await.chat.lines()[0].author_name, SYSTEM_AUTHOR_NAME);
    }

    #[tokio::test]
    async fn test_last_writer_wins_by_sequence() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        let (b, _) = join(&coord, "Bob").await;
        coord.submit(a, CandidateEvent::code(Language::Python, "a")).await.unwrap();
        coord.submit(b, CandidateEvent::instructions("first")).await.unwrap();
        let last_code = coord.submit(b, CandidateEvent::code(Language::Java, "b")).await.unwrap();
        coord.submit(a, CandidateEvent::instructions("second")).await.unwrap();

        let state = coord.state().await;
        assert_eq!(state.code.current().unwrap().sequence, last_code.sequence);
        assert_eq!(state.code.text(), "b");
        assert_eq!(state.instructions.text(), "second");
    }

    #[tokio::test]
    async fn test_subscribe_from_zero_matches_replay() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        coord.submit(a, CandidateEvent::chat("one")).await.unwrap();
        coord.submit(a, CandidateEvent::stroke(stroke())).await.unwrap();
        coord.submit(a, CandidateEvent::focus(Panel::Drawing)).await.unwrap();

        let mut sub = coord.subscribe(0).await.unwrap();
        assert_eq!(sub.backlog_len(), 3);
        coord.submit(a, CandidateEvent::clear_drawing()).await.unwrap();

        let mut state = RoomState::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            let event = event_of(sub.next().await);
            seen.push(event.sequence);
            state.apply(&event);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(sub.try_next().is_none());
        assert_eq!(state, coord.replay().await);
    }

    #[tokio::test]
    async fn test_subscribe_mid_log() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        for i in 0..5 {
            coord.submit(a, CandidateEvent::chat(format!("m{i}"))).await.unwrap();
        }
        let mut sub = coord.subscribe(3).await.unwrap();
        assert_eq!(event_of(sub.try_next()).sequence, 3);
        assert_eq!(event_of(sub.try_next()).sequence, 4);
        assert!(sub.try_next().is_none());
        assert_eq!(sub.next_sequence(), 5);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_forced_to_resync() {
        let coord = coordinator();
        let (a, mut catch_up) = join(&coord, "Alice").await;
        let buffer = coord.config().participant_buffer;
        for i in 0..buffer + 4 {
            coord.submit(a, CandidateEvent::chat(format!("m{i}"))).await.unwrap();
        }

        assert_eq!(catch_up.subscription.next().await, Some(Delivery::Resync));
        assert!(catch_up.subscription.next().await.is_none());
        assert!(catch_up.subscription.is_ended());
        assert_eq!(coord.stats().await.broadcast.resyncs_forced, 1);

        // A fresh replay from 0 recovers everything
        let mut sub = coord.subscribe(0).await.unwrap();
        assert_eq!(sub.backlog_len(), buffer + 4);
        let mut state = RoomState::default();
        while let Some(Delivery::Event(event)) = sub.try_next() {
            state.apply(&event);
        }
        assert_eq!(state, coord.replay().await);
    }

    #[tokio::test]
    async fn test_submit_times_out_while_room_is_busy() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;

        let guard = coord.inner.lock().await;
        let err = coord.submit(a, CandidateEvent::chat("hi")).await.unwrap_err();
        assert_eq!(err, SubmitError::Timeout);
        drop(guard);

        assert_eq!(coord.event_count().await, 0);
        assert!(coord.submit(a, CandidateEvent::chat("hi")).await.is_ok());
    }

    #[tokio::test]
    async fn test_join_times_out_while_room_is_busy() {
        let coord = coordinator();
        let guard = coord.inner.lock().await;
        let err = coord.join(Uuid::new_v4(), "Alice".into()).await.err();
        assert_eq!(err, Some(JoinError::Timeout));
        drop(guard);

        assert_eq!(coord.participant_count().await, 0);
        assert!(coord.join(Uuid::new_v4(), "Alice".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_times_out_while_room_is_busy() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        coord.submit(a, CandidateEvent::chat("hi")).await.unwrap();

        let guard = coord.inner.lock().await;
        assert_eq!(coord.subscribe(0).await.err(), Some(SubmitError::Timeout));
        drop(guard);

        let mut sub = coord.subscribe(0).await.unwrap();
        assert_eq!(event_of(sub.try_next()).sequence, 0);
    }

    #[tokio::test]
    async fn test_cancelled_submit_does_not_stall_room() {
        let coord = Arc::new(SessionCoordinator::new(
            "r1",
            CoordinatorConfig {
                operation_timeout: Duration::from_secs(30),
                ..CoordinatorConfig::for_testing()
            },
        ));
        let (a, _) = join(&coord, "Alice").await;

        let guard = coord.inner.lock().await;
        let waiting = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.submit(a, CandidateEvent::chat("stuck")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiting.abort();
        drop(guard);

        let event = tokio::time::timeout(
            Duration::from_secs(1),
            coord.submit(a, CandidateEvent::chat("next")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(event.sequence, 0);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_converge() {
        let coord = Arc::new(SessionCoordinator::new(
            "r1",
            CoordinatorConfig {
                participant_buffer: 128,
                ..CoordinatorConfig::for_testing()
            },
        ));
        let mut authors = Vec::new();
        let mut feeds = Vec::new();
        for name in ["A", "B", "C", "D"] {
            let (id, catch_up) = join(&coord, name).await;
            authors.push(id);
            feeds.push(catch_up.subscription);
        }

        let mut tasks = Vec::new();
        for (n, author) in authors.iter().copied().enumerate() {
            let coord = coord.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    let candidate = match i % 3 {
                        0 => CandidateEvent::chat(format!("{author}:{i}")),
                        1 => CandidateEvent::code(Language::Python, format!("print({n}{i})")),
                        _ => CandidateEvent::stroke(stroke()),
                    };
                    coord.submit(author, candidate).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(coord.event_count().await, 40);
        let omniscient = coord.replay().await;
        for mut feed in feeds {
            let mut state = RoomState::default();
            let mut expected = 0;
            while let Some(Delivery::Event(event)) = feed.try_next() {
                assert_eq!(event.sequence, expected);
                expected += 1;
                state.apply(&event);
            }
            assert_eq!(expected, 40);
            assert_eq!(state, omniscient);
        }
        assert_eq!(coord.state().await, omniscient);
    }

    #[tokio::test]
    async fn test_ack_is_monotonic_and_clamped() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        assert_eq!(coord.ack(a, 3).await.unwrap(), None);

        for i in 0..3 {
            coord.submit(a, CandidateEvent::chat(format!("m{i}"))).await.unwrap();
        }
        assert_eq!(coord.ack(a, 1).await.unwrap(), Some(1));
        assert_eq!(coord.ack(a, 0).await.unwrap(), Some(1));
        assert_eq!(coord.ack(a, 99).await.unwrap(), Some(2));
        assert_eq!(coord.participants().await[0].last_acked, Some(2));
        assert_eq!(coord.ack(Uuid::new_v4(), 0).await, Err(SubmitError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_retention_compacts_acknowledged_prefix() {
        let coord = SessionCoordinator::new(
            "r1",
            CoordinatorConfig {
                retained_events: Some(2),
                ..CoordinatorConfig::for_testing()
            },
        );
        let (a, _) = join(&coord, "Alice").await;
        for i in 0..5 {
            coord.submit(a, CandidateEvent::chat(format!("m{i}"))).await.unwrap();
        }
        // Nothing acknowledged yet: nothing may be compacted
        assert_eq!(coord.stats().await.retained_events, 5);

        coord.ack(a, 4).await.unwrap();
        let stats = coord.stats().await;
        assert_eq!(stats.retained_events, 2);
        assert_eq!(stats.first_retained, 3);

        // Late joiner reconstructs from snapshot + tail
        let (_, catch_up) = join(&coord, "Bob").await;
        let mut state = catch_up.snapshot.expect("compacted prefix snapshot");
        for event in &catch_up.events {
            state.apply(event);
        }
        assert_eq!(state, coord.state().await);
        assert_eq!(state.chat.texts(), vec!["m0", "m1", "m2", "m3", "m4"]);

        // Resubscribing from 0 starts with the snapshot
        let mut sub = coord.subscribe(0).await.unwrap();
        assert!(matches!(sub.try_next(), Some(Delivery::Snapshot(_))));
        assert_eq!(event_of(sub.try_next()).sequence, 3);
    }

    #[tokio::test]
    async fn test_retry_after_compaction_returns_original() {
        let coord = SessionCoordinator::new(
            "r1",
            CoordinatorConfig {
                retained_events: Some(1),
                ..CoordinatorConfig::for_testing()
            },
        );
        let (a, _) = join(&coord, "Alice").await;
        let retried = CandidateEvent::chat("hello").with_client_event_id(Uuid::new_v4());
        let original = coord.submit(a, retried.clone()).await.unwrap();
        let weak = Arc::downgrade(&original);
        drop(original);
        coord.submit(a, CandidateEvent::chat("second")).await.unwrap();
        coord.submit(a, CandidateEvent::chat("third")).await.unwrap();
        coord.ack(a, 2).await.unwrap();
        assert_eq!(coord.stats().await.first_retained, 2);
        assert!(weak.upgrade().is_none());

        let retry = coord.submit(a, retried).await.unwrap();
        assert_eq!(retry.sequence, 0);
        assert_eq!(retry.author_id, a);
        assert_eq!(coord.event_count().await, 3);
        assert_eq!(coord.state().await.chat.texts(), vec!["hello", "second", "third"]);
        match &retry.payload {
            Payload::ChatMessage(chat) => assert_eq!(chat.author_name, "Alice"),
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_room_full() {
        let coord = SessionCoordinator::new(
            "r1",
            CoordinatorConfig {
                max_participants: 1,
                ..CoordinatorConfig::for_testing()
            },
        );
        join(&coord, "Alice").await;
        let err = coord.join(Uuid::new_v4(), "Bob".into()).await.err();
        assert_eq!(err, Some(JoinError::RoomFull { limit: 1 }));
    }

    #[tokio::test]
    async fn test_idle_close_discards_log() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        coord.submit(a, CandidateEvent::chat("hi")).await.unwrap();

        // Occupied rooms are never idle
        assert!(!coord.close_if_idle().await);
        assert!(coord.idle_deadline().await.is_none());

        assert!(coord.leave(a).await);
        assert!(!coord.leave(a).await);
        assert!(coord.idle_deadline().await.is_some());
        assert!(coord.close_if_idle().await);
        assert!(coord.is_closed().await);
        assert_eq!(coord.event_count().await, 0);

        let err = coord.join(Uuid::new_v4(), "Bob".into()).await.err();
        assert_eq!(err, Some(JoinError::RoomNotFound));
        assert_eq!(coord.subscribe(0).await.err(), Some(SubmitError::RoomNotFound));
    }

    #[tokio::test]
    async fn test_grace_period_protects_rejoin() {
        let coord = SessionCoordinator::new(
            "r1",
            CoordinatorConfig {
                idle_grace: Duration::from_secs(60),
                ..CoordinatorConfig::for_testing()
            },
        );
        let (a, _) = join(&coord, "Alice").await;
        coord.leave(a).await;
        assert!(!coord.close_if_idle().await);
        assert!(coord.join(Uuid::new_v4(), "Alice".into()).await.is_ok());
    }

    struct EchoExecutor;

    impl CodeExecutor for EchoExecutor {
        fn execute(
            &self,
            request: ExecutionRequest,
        ) -> BoxFuture<'static, Result<ExecutionOutput, ExecutionError>> {
            Box::pin(async move {
                Ok(ExecutionOutput {
                    stdout: format!("{}:{}", request.language.as_str(), request.source),
                    stderr: String::new(),
                    exit_status: Some(0),
                })
            })
        }
    }

    struct HangingExecutor;

    impl CodeExecutor for HangingExecutor {
        fn execute(
            &self,
            _request: ExecutionRequest,
        ) -> BoxFuture<'static, Result<ExecutionOutput, ExecutionError>> {
            Box::pin(futures_util::future::pending())
        }
    }

    #[tokio::test]
    async fn test_run_code_uses_latest_document() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        coord.submit(a, CandidateEvent::code(Language::Python, "print(1)")).await.unwrap();
        coord.submit(a, CandidateEvent::code(Language::Python, "print(2)")).await.unwrap();

        let output = coord.run_code(a, &EchoExecutor).await.unwrap();
        assert_eq!(output.stdout, "python:print(2)");
        // Execution never enters the ordered stream
        assert_eq!(coord.event_count().await, 2);
    }

    #[tokio::test]
    async fn test_run_code_timeout_and_membership() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        assert_eq!(
            coord.run_code(a, &HangingExecutor).await,
            Err(RunCodeError::Execution(ExecutionError::Timeout))
        );
        assert_eq!(
            coord.run_code(Uuid::new_v4(), &EchoExecutor).await,
            Err(RunCodeError::Room(SubmitError::SessionNotFound))
        );
    }

    #[tokio::test]
    async fn test_subscription_as_stream() {
        let coord = coordinator();
        let (a, _) = join(&coord, "Alice").await;
        coord.submit(a, CandidateEvent::chat("one")).await.unwrap();
        coord.submit(a, CandidateEvent::chat("two")).await.unwrap();

        let stream = coord.subscribe(0).await.unwrap().into_stream();
        let deliveries: Vec<Delivery> = stream.take(2).collect().await;
        assert_eq!(deliveries.len(), 2);
    }
}
