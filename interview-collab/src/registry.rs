//! Room lifecycle: create, passkey-gated join, explicit idle eviction.
//!
//! ```text
//! RoomRegistry
//! ├── rooms:    room_id    → Room { passkey, SessionCoordinator }
//! └── sessions: session_id → ParticipantSession
//! ```
//!
//! The registry maps are only held for lookups and inserts; every await on a
//! room happens after the map lock is released, so one busy room never
//! blocks the others. Eviction is two-phase: the coordinator closes itself
//! under its own lock, then the registry drops it from the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use interview_core::{CandidateEvent, Event, Projector, RoomState, Sequence};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::collaborators::{AuthGate, CodeExecutor, DisplayNameGate, ExecutionOutput, UnavailableExecutor};
use crate::config::CoordinatorConfig;
use crate::coordinator::{ParticipantInfo, SessionCoordinator};
use crate::error::{CreateRoomError, JoinError, RunCodeError, SubmitError};
use crate::session::ParticipantSession;
use crate::subscription::Subscription;

const ROOM_ID_PREFIX: &str = "room-";
const ROOM_ID_LEN: usize = 8;
const PASSKEY_LEN: usize = 12;

/// A live room: passkey plus the coordinator that owns its log.
pub struct Room {
    id: String,
    passkey: String,
    created_at: u64,
    coordinator: Arc<SessionCoordinator>,
}

impl Room {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    fn passkey_matches(&self, candidate: &str) -> bool {
        constant_time_eq(self.passkey.as_bytes(), candidate.as_bytes())
    }
}

/// Successful join: the session handle plus everything needed to rebuild
/// the room locally.
pub struct JoinAck {
    pub session: ParticipantSession,
    pub snapshot: Option<RoomState>,
    pub events: Vec<Arc<Event>>,
    pub subscription: Subscription,
}

impl JoinAck {
    /// Fold the catch-up into a room state.
    pub fn initial_state(&self) -> RoomState {
        let mut state = self.snapshot.clone().unwrap_or_default();
        for event in &self.events {
            state.apply(event);
        }
        state
    }

    /// Sequence the live subscription continues from.
    pub fn next_sequence(&self) -> Sequence {
        self.subscription.next_sequence()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_rooms: usize,
    pub active_sessions: usize,
    pub rooms_created: u64,
    pub rooms_evicted: u64,
    pub joins_rejected: u64,
    pub events_appended: u64,
    pub resyncs_forced: u64,
}

#[derive(Debug, Default)]
struct AtomicRegistryStats {
    rooms_created: AtomicU64,
    rooms_evicted: AtomicU64,
    joins_rejected: AtomicU64,
}

/// All rooms of one server process.
pub struct RoomRegistry {
    config: CoordinatorConfig,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    sessions: RwLock<HashMap<Uuid, ParticipantSession>>,
    auth_gate: Arc<dyn AuthGate>,
    executor: Arc<dyn CodeExecutor>,
    stats: AtomicRegistryStats,
}

impl RoomRegistry {
    /// Registry with the default display-name gate and no code executor.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(DisplayNameGate::default()),
            Arc::new(UnavailableExecutor),
        )
    }

    pub fn with_collaborators(
        config: CoordinatorConfig,
        auth_gate: Arc<dyn AuthGate>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        Self {
            config,
            rooms: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            auth_gate,
            executor,
            stats: AtomicRegistryStats::default(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Create a room under a fresh `room-xxxxxxxx` id.
    pub async fn create_room(&self, passkey: &str) -> Result<String, CreateRoomError> {
        let passkey = normalize_passkey(passkey)?;
        let mut rooms = self.rooms.write().await;
        let id = loop {
            let candidate = format!("{ROOM_ID_PREFIX}{}", random_base36(ROOM_ID_LEN));
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        rooms.insert(id.clone(), Arc::new(self.new_room(id.clone(), passkey)));
        self.stats.rooms_created.fetch_add(1, Ordering::Relaxed);
        log::info!("Room {id} created ({} active)", rooms.len());
        Ok(id)
    }

    /// Create a room under an operator-chosen id.
    pub async fn create_room_with_id(&self, room_id: &str, passkey: &str) -> Result<String, CreateRoomError> {
        let id = room_id.trim();
        if id.is_empty() {
            return Err(CreateRoomError::InvalidRoomId);
        }
        let passkey = normalize_passkey(passkey)?;
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(id) {
            return Err(CreateRoomError::RoomExists(id.to_string()));
        }
        rooms.insert(id.to_string(), Arc::new(self.new_room(id.to_string(), passkey)));
        self.stats.rooms_created.fetch_add(1, Ordering::Relaxed);
        log::info!("Room {id} created ({} active)", rooms.len());
        Ok(id.to_string())
    }

    fn new_room(&self, id: String, passkey: String) -> Room {
        Room {
            coordinator: Arc::new(SessionCoordinator::new(id.clone(), self.config.clone())),
            id,
            passkey,
            created_at: interview_core::current_timestamp(),
        }
    }

    /// A random 12-character passkey for callers that do not choose one.
    pub fn generate_passkey() -> String {
        random_base36(PASSKEY_LEN)
    }

    /// Passkey-gated join.
    ///
    /// Fails with `RoomNotFound` for unknown or evicted rooms and
    /// `BadPasskey` on mismatch; neither has side effects.
    pub async fn join(&self, room_id: &str, passkey: &str, display_name: &str) -> Result<JoinAck, JoinError> {
        let result = self.try_join(room_id.trim(), passkey.trim(), display_name).await;
        if let Err(e) = &result {
            self.stats.joins_rejected.fetch_add(1, Ordering::Relaxed);
            log::warn!("Join to room {} rejected: {e}", room_id.trim());
        }
        result
    }

    async fn try_join(&self, room_id: &str, passkey: &str, display_name: &str) -> Result<JoinAck, JoinError> {
        let room = self.room(room_id).await.ok_or(JoinError::RoomNotFound)?;
        if !room.passkey_matches(passkey) {
            return Err(JoinError::BadPasskey);
        }
        let display_name = self
            .auth_gate
            .admit(room_id, display_name)
            .map_err(JoinError::Rejected)?;

        let session_id = Uuid::new_v4();
        let catch_up = room.coordinator.join(session_id, display_name.clone()).await?;
        let session = ParticipantSession::new(
            session_id,
            room.id.clone(),
            display_name,
            room.coordinator.clone(),
        );
        self.sessions.write().await.insert(session_id, session.clone());

        Ok(JoinAck {
            session,
            snapshot: catch_up.snapshot,
            events: catch_up.events,
            subscription: catch_up.subscription,
        })
    }

    pub async fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn session(&self, session_id: &Uuid) -> Option<ParticipantSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn require_session(&self, session_id: &Uuid) -> Result<ParticipantSession, SubmitError> {
        self.session(session_id).await.ok_or(SubmitError::SessionNotFound)
    }

    /// Submit on behalf of a joined session.
    pub async fn submit(&self, session_id: &Uuid, candidate: CandidateEvent) -> Result<Arc<Event>, SubmitError> {
        self.require_session(session_id).await?.submit(candidate).await
    }

    /// Submit as the reserved system author.
    pub async fn submit_system(&self, room_id: &str, candidate: CandidateEvent) -> Result<Arc<Event>, SubmitError> {
        let room = self.room(room_id).await.ok_or(SubmitError::RoomNotFound)?;
        room.coordinator.submit_system(candidate).await
    }

    pub async fn subscribe(&self, session_id: &Uuid, from: Sequence) -> Result<Subscription, SubmitError> {
        self.require_session(session_id).await?.subscribe(from).await
    }

    pub async fn ack(&self, session_id: &Uuid, sequence: Sequence) -> Result<Option<Sequence>, SubmitError> {
        let mut session = self.require_session(session_id).await?;
        let acked = session.ack(sequence).await?;
        if let Some(stored) = self.sessions.write().await.get_mut(session_id) {
            stored.record_ack(acked);
        }
        Ok(acked)
    }

    /// Remove a session from its room. Returns `false` for unknown sessions.
    pub async fn leave(&self, session_id: &Uuid) -> bool {
        let session = self.sessions.write().await.remove(session_id);
        match session {
            Some(session) => session.leave().await,
            None => false,
        }
    }

    /// Run the session's room code through the configured executor.
    pub async fn run_code(&self, session_id: &Uuid) -> Result<ExecutionOutput, RunCodeError> {
        let session = self.require_session(session_id).await?;
        session.run_code(self.executor.as_ref()).await
    }

    pub async fn participants(&self, room_id: &str) -> Option<Vec<ParticipantInfo>> {
        let room = self.room(room_id).await?;
        Some(room.coordinator.participants().await)
    }

    /// Evict every room that has been empty for the idle grace period.
    ///
    /// Returns the evicted room ids. A participant rejoining within the
    /// grace window keeps the room alive.
    pub async fn evict_idle(&self) -> Vec<String> {
        let candidates: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();

        let mut closed = Vec::new();
        for room in candidates {
            if room.coordinator.close_if_idle().await {
                closed.push(room);
            }
        }
        if closed.is_empty() {
            return Vec::new();
        }

        let mut evicted = Vec::with_capacity(closed.len());
        {
            let mut rooms = self.rooms.write().await;
            for room in &closed {
                if rooms.get(&room.id).is_some_and(|current| Arc::ptr_eq(current, room)) {
                    rooms.remove(&room.id);
                    evicted.push(room.id.clone());
                }
            }
        }
        self.sessions
            .write()
            .await
            .retain(|_, session| !evicted.iter().any(|id| id == session.room_id()));

        self.stats
            .rooms_evicted
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        for id in &evicted {
            log::info!("Evicted idle room {id}");
        }
        evicted
    }

    /// Run [`RoomRegistry::evict_idle`] every `interval` until the registry
    /// is dropped.
    pub fn spawn_eviction_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.evict_idle().await;
                if !evicted.is_empty() {
                    log::debug!("Eviction sweep removed {} rooms", evicted.len());
                }
            }
        })
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut stats = RegistryStats {
            active_rooms: rooms.len(),
            active_sessions: self.session_count().await,
            rooms_created: self.stats.rooms_created.load(Ordering::Relaxed),
            rooms_evicted: self.stats.rooms_evicted.load(Ordering::Relaxed),
            joins_rejected: self.stats.joins_rejected.load(Ordering::Relaxed),
            ..RegistryStats::default()
        };
        for room in rooms {
            let room_stats = room.coordinator.stats().await;
            stats.events_appended += room_stats.events_appended;
            stats.resyncs_forced += room_stats.broadcast.resyncs_forced;
        }
        stats
    }
}

fn normalize_passkey(passkey: &str) -> Result<String, CreateRoomError> {
    let passkey = passkey.trim();
    if passkey.is_empty() {
        return Err(CreateRoomError::InvalidPasskey);
    }
    Ok(passkey.to_string())
}

/// Lowercase base-36 string from a v4 UUID's random bits.
fn random_base36(len: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut value = Uuid::new_v4().as_u128();
    (0..len)
        .map(|_| {
            let digit = (value % 36) as usize;
            value /= 36;
            DIGITS[digit] as char
        })
        .collect()
}

/// Compare without an early exit so timing does not reveal the matching
/// prefix length.
fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let len = expected.len().max(provided.len());
    let mut diff = expected.len() ^ provided.len();
    for i in 0..len {
        let a = expected.get(i).copied().unwrap_or(0);
        let b = provided.get(i).copied().unwrap_or(0);
        diff |= usize::from(a ^ b);
    }
    diff == 0
}
