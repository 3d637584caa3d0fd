//! WebSocket room client.
//!
//! Provides:
//! - Connection lifecycle (connect, join, disconnect)
//! - A local `RoomState` replica folded from the server's ordered stream
//! - Acknowledgement of applied events
//! - Resync: discard local state and replay from sequence 0
//! - Offline queue for submissions made before the join completes
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use interview_core::{CandidateEvent, Event, Projector, RoomState, Sequence};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::collaborators::ExecutionOutput;
use crate::coordinator::ParticipantInfo;
use crate::error::{JoinError, RunCodeError, SubmitError};
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, join pending
    Connected,
    /// Joined; submissions go straight to the server
    Joined,
}

/// Events emitted by the room client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Joined {
        session_id: Uuid,
        room_id: String,
        display_name: String,
    },
    JoinRejected(JoinError),
    /// An event was folded into the local state
    Applied(Event),
    /// Local state was replaced by a snapshot of a compacted prefix
    SnapshotInstalled { through: Option<Sequence> },
    /// Local state was discarded; replay from 0 is in progress
    Resynced,
    Submitted { request_id: u64, sequence: Sequence },
    SubmitRejected { request_id: u64, error: SubmitError },
    ExecutionResult {
        request_id: u64,
        result: Result<ExecutionOutput, RunCodeError>,
    },
    Participants(Vec<ParticipantInfo>),
    ServerError(String),
    Pong,
}

/// What [`LocalReplica::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaUpdate {
    Applied,
    /// Already folded, or arriving from a superseded subscription
    Ignored,
    /// Events are missing; the replica must resync
    Gap { expected: Sequence, got: Sequence },
}

/// Client-side fold of the room's ordered stream.
#[derive(Debug, Clone, Default)]
pub struct LocalReplica {
    state: RoomState,
    /// Set after a reset until the replay reaches this replica.
    awaiting_replay: bool,
}

impl LocalReplica {
    pub fn state(&self) -> &RoomState {
        &self.state
    }

    pub fn next_sequence(&self) -> Sequence {
        self.state.next_sequence()
    }

    /// Discard everything and wait for a replay from 0.
    pub fn reset(&mut self) {
        self.state = RoomState::default();
        self.awaiting_replay = true;
    }

    pub fn install_snapshot(&mut self, snapshot: RoomState) {
        self.state = snapshot;
        self.awaiting_replay = false;
    }

    /// Fold `event` if it is the next one expected.
    ///
    /// The log is immutable, so whichever subscription delivers the expected
    /// sequence delivers the same event.
    pub fn apply(&mut self, event: &Event) -> ReplicaUpdate {
        let expected = self.next_sequence();
        if event.sequence < expected {
            return ReplicaUpdate::Ignored;
        }
        if event.sequence > expected {
            if self.awaiting_replay {
                return ReplicaUpdate::Ignored;
            }
            return ReplicaUpdate::Gap {
                expected,
                got: event.sequence,
            };
        }
        self.state.apply(event);
        self.awaiting_replay = false;
        ReplicaUpdate::Applied
    }
}

#[derive(Debug, Clone)]
struct QueuedSubmit {
    request_id: u64,
    candidate: CandidateEvent,
}

/// Offline queue for submissions made while not joined.
///
/// Queued candidates carry a dedup key, so replaying one the server already
/// accepted returns the original event instead of a duplicate.
pub struct OfflineQueue {
    queue: VecDeque<QueuedSubmit>,
    max_size: usize,
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue a submission for later replay.
    pub fn enqueue(&mut self, request_id: u64, candidate: CandidateEvent) -> bool {
        if self.queue.len() >= self.max_size {
            return false; // Queue full
        }
        self.queue.push_back(QueuedSubmit {
            request_id,
            candidate,
        });
        true
    }

    /// Drain all queued submissions for replay, oldest first.
    pub fn drain(&mut self) -> Vec<(u64, CandidateEvent)> {
        self.queue
            .drain(..)
            .map(|q| (q.request_id, q.candidate))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// State shared between the client handle and its connection tasks.
#[derive(Clone)]
struct Shared {
    state: Arc<RwLock<ConnectionState>>,
    replica: Arc<RwLock<LocalReplica>>,
    offline_queue: Arc<Mutex<OfflineQueue>>,
    session_id: Arc<RwLock<Option<Uuid>>>,
    next_request_id: Arc<AtomicU64>,
    event_tx: mpsc::Sender<ClientEvent>,
}

/// The room client.
pub struct RoomClient {
    room_id: String,
    passkey: String,
    display_name: String,
    server_url: String,
    shared: Shared,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl RoomClient {
    pub fn new(
        server_url: impl Into<String>,
        room_id: impl Into<String>,
        passkey: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            room_id: room_id.into(),
            passkey: passkey.into(),
            display_name: display_name.into(),
            server_url: server_url.into(),
            shared: Shared {
                state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
                replica: Arc::new(RwLock::new(LocalReplica::default())),
                offline_queue: Arc::new(Mutex::new(OfflineQueue::new(10_000))),
                session_id: Arc::new(RwLock::new(None)),
                next_request_id: Arc::new(AtomicU64::new(1)),
                event_tx,
            },
            outgoing_tx: None,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect and send the join request.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages. The
    /// join outcome arrives as [`ClientEvent::Joined`] or
    /// [`ClientEvent::JoinRejected`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.shared.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.shared.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        self.outgoing_tx = Some(out_tx.clone());

        *self.shared.state.write().await = ConnectionState::Connected;
        let _ = self.shared.event_tx.send(ClientEvent::Connected).await;

        let join = ClientMessage::Join {
            room_id: self.room_id.clone(),
            passkey: self.passkey.clone(),
            display_name: self.display_name.clone(),
        };
        send_message(&out_tx, &join).await?;

        // Reader task: fold incoming messages into the replica
        let shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match ServerMessage::decode(&bytes) {
                            Ok(server_msg) => handle_server_message(server_msg, &shared, &out_tx).await,
                            Err(e) => log::warn!("Failed to decode server message: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *shared.state.write().await = ConnectionState::Disconnected;
            *shared.session_id.write().await = None;
            let _ = shared.event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Submit a candidate event; returns the request id echoed in
    /// [`ClientEvent::Submitted`] / [`ClientEvent::SubmitRejected`].
    ///
    /// Candidates without a dedup key get one, so offline replay and manual
    /// retries are idempotent. While not joined the candidate is queued.
    pub async fn submit(&self, candidate: CandidateEvent) -> Result<u64, ProtocolError> {
        let candidate = if candidate.client_event_id.is_none() {
            candidate.with_client_event_id(Uuid::new_v4())
        } else {
            candidate
        };
        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);

        // The queue lock spans the state check and the send, so a submit can
        // never land in the queue after the join has drained it.
        let mut queue = self.shared.offline_queue.lock().await;
        if *self.shared.state.read().await != ConnectionState::Joined {
            if !queue.enqueue(request_id, candidate) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(request_id);
        }

        self.send(&ClientMessage::Submit {
            request_id,
            candidate,
        })
        .await?;
        drop(queue);
        Ok(request_id)
    }

    /// Ask the server to run the room's current code document.
    pub async fn run_code(&self) -> Result<u64, ProtocolError> {
        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.send(&ClientMessage::RunCode { request_id }).await?;
        Ok(request_id)
    }

    pub async fn request_participants(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Participants).await
    }

    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Ping).await
    }

    /// Leave the room and close the connection.
    pub async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        let result = self.send(&ClientMessage::Leave).await;
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        *self.shared.session_id.write().await = None;
        result
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        match self.outgoing_tx {
            Some(ref tx) => send_message(tx, msg).await,
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn session_id(&self) -> Option<Uuid> {
        *self.shared.session_id.read().await
    }

    /// Snapshot of the local replica.
    pub async fn room_state(&self) -> RoomState {
        self.shared.replica.read().await.state().clone()
    }

    /// Sequence the replica expects next.
    pub async fn next_sequence(&self) -> Sequence {
        self.shared.replica.read().await.next_sequence()
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.shared.offline_queue.lock().await.len()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

async fn send_message(tx: &mpsc::Sender<Message>, msg: &ClientMessage) -> Result<(), ProtocolError> {
    let encoded = msg.encode()?;
    tx.send(Message::Binary(encoded.into()))
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)
}

async fn handle_server_message(msg: ServerMessage, shared: &Shared, out_tx: &mpsc::Sender<Message>) {
    let event = match msg {
        ServerMessage::Joined {
            session_id,
            room_id,
            display_name,
            snapshot,
            events,
        } => {
            let last = {
                let mut replica = shared.replica.write().await;
                replica.install_snapshot(snapshot.unwrap_or_default());
                for event in &events {
                    replica.apply(event);
                }
                replica.state().through()
            };
            *shared.session_id.write().await = Some(session_id);
            log::info!("Joined room {room_id} as {display_name} with {} events", events.len());

            if let Some(sequence) = last {
                let _ = send_message(out_tx, &ClientMessage::Ack { sequence }).await;
            }

            // Flip to Joined and replay under the queue lock; see `RoomClient::submit`.
            let mut queue = shared.offline_queue.lock().await;
            *shared.state.write().await = ConnectionState::Joined;
            let queued = queue.drain();
            if !queued.is_empty() {
                log::info!("Replaying {} queued submissions", queued.len());
                for (request_id, candidate) in queued {
                    let _ = send_message(out_tx, &ClientMessage::Submit { request_id, candidate }).await;
                }
            }
            drop(queue);

            Some(ClientEvent::Joined {
                session_id,
                room_id,
                display_name,
            })
        }

        ServerMessage::Event(event) => {
            let update = shared.replica.write().await.apply(&event);
            match update {
                ReplicaUpdate::Applied => {
                    let ack = ClientMessage::Ack {
                        sequence: event.sequence,
                    };
                    let _ = send_message(out_tx, &ack).await;
                    Some(ClientEvent::Applied(event))
                }
                ReplicaUpdate::Ignored => None,
                ReplicaUpdate::Gap { expected, got } => {
                    log::warn!("Delivery gap: expected #{expected}, got #{got}; resyncing");
                    Some(resync(shared, out_tx).await)
                }
            }
        }

        ServerMessage::Snapshot(state) => {
            let through = state.through();
            shared.replica.write().await.install_snapshot(state);
            Some(ClientEvent::SnapshotInstalled { through })
        }

        ServerMessage::Resync => {
            log::warn!("Server forced a resync");
            Some(resync(shared, out_tx).await)
        }

        ServerMessage::JoinRejected(e) => {
            log::warn!("Join rejected: {e}");
            Some(ClientEvent::JoinRejected(e))
        }
        ServerMessage::Submitted { request_id, sequence } => Some(ClientEvent::Submitted { request_id, sequence }),
        ServerMessage::SubmitRejected { request_id, error } => {
            Some(ClientEvent::SubmitRejected { request_id, error })
        }
        ServerMessage::ExecutionResult { request_id, result } => {
            Some(ClientEvent::ExecutionResult { request_id, result })
        }
        ServerMessage::Participants(list) => Some(ClientEvent::Participants(list)),
        ServerMessage::Error(message) => Some(ClientEvent::ServerError(message)),
        ServerMessage::Pong => Some(ClientEvent::Pong),
        other @ (ServerMessage::RoomCreated { .. } | ServerMessage::CreateRejected(_)) => {
            log::debug!("Ignoring unsolicited {other:?}");
            None
        }
    };

    if let Some(event) = event {
        let _ = shared.event_tx.send(event).await;
    }
}

async fn resync(shared: &Shared, out_tx: &mpsc::Sender<Message>) -> ClientEvent {
    shared.replica.write().await.reset();
    let _ = send_message(out_tx, &ClientMessage::Resubscribe { from_sequence: 0 }).await;
    ClientEvent::Resynced
}

/// Create a room over a short-lived connection; returns the room id.
pub async fn create_room(
    server_url: &str,
    passkey: &str,
    room_id: Option<&str>,
) -> Result<String, ProtocolError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(server_url)
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?;
    let (mut writer, mut reader) = ws_stream.split();

    let request = ClientMessage::CreateRoom {
        passkey: passkey.to_string(),
        room_id: room_id.map(str::to_string),
    };
    writer
        .send(Message::Binary(request.encode()?.into()))
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?;

    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = reader.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    return ServerMessage::decode(&bytes);
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
        Err(ProtocolError::ConnectionClosed)
    })
    .await
    .map_err(|_| ProtocolError::Timeout)??;

    let _ = writer.close().await;
    match reply {
        ServerMessage::RoomCreated { room_id } => Ok(room_id),
        ServerMessage::CreateRejected(e) => Err(ProtocolError::Rejected(e.to_string())),
        other => Err(ProtocolError::UnexpectedMessage(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interview_core::EventLog;

    fn log_with(n: usize) -> (EventLog, Vec<Event>) {
        let mut log = EventLog::new("r1");
        let author = Uuid::new_v4();
        let events = (0..n)
            .map(|i| (*log.append(author, CandidateEvent::chat(format!("m{i}")))).clone())
            .collect();
        (log, events)
    }

    #[test]
    fn test_replica_applies_in_order() {
        let (log, events) = log_with(3);
        let mut replica = LocalReplica::default();
        for event in &events {
            assert_eq!(replica.apply(event), ReplicaUpdate::Applied);
        }
        assert_eq!(replica.apply(&events[1]), ReplicaUpdate::Ignored);
        assert_eq!(replica.state(), &log.replay());
    }

    #[test]
    fn test_replica_detects_gap() {
        let (_, events) = log_with(3);
        let mut replica = LocalReplica::default();
        replica.apply(&events[0]);
        assert_eq!(
            replica.apply(&events[2]),
            ReplicaUpdate::Gap { expected: 1, got: 2 }
        );
    }

    #[test]
    fn test_replica_reset_ignores_stale_stream() {
        let (log, events) = log_with(4);
        let mut replica = LocalReplica::default();
        replica.apply(&events[0]);
        replica.reset();

        // Late events from the old subscription are dropped, not gaps
        assert_eq!(replica.apply(&events[3]), ReplicaUpdate::Ignored);
        for event in &events {
            assert_eq!(replica.apply(event), ReplicaUpdate::Applied);
        }
        assert_eq!(replica.state(), &log.replay());
    }

    #[test]
    fn test_replica_snapshot_then_tail() {
        let (mut log, events) = log_with(5);
        log.compact_before(3);
        let mut replica = LocalReplica::default();
        replica.install_snapshot(log.base().clone());
        assert_eq!(replica.next_sequence(), 3);
        assert_eq!(replica.apply(&events[3]), ReplicaUpdate::Applied);
        assert_eq!(replica.apply(&events[4]), ReplicaUpdate::Applied);
        assert_eq!(replica.state(), &log.replay());
    }

    fn joined_message() -> ServerMessage {
        ServerMessage::Joined {
            session_id: Uuid::new_v4(),
            room_id: "r1".into(),
            display_name: "Alice".into(),
            snapshot: None,
            events: Vec::new(),
        }
    }

    fn sent(out_rx: &mut mpsc::Receiver<Message>) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = out_rx.try_recv() {
            if let Message::Binary(data) = msg {
                let bytes: Vec<u8> = data.into();
                messages.push(ClientMessage::decode(&bytes).unwrap());
            }
        }
        messages
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submits_racing_join_are_never_stranded() {
        for _ in 0..50 {
            let mut client = RoomClient::new("ws://localhost:9090", "r1", "abc", "Alice");
            let _events = client.take_event_rx();
            let (out_tx, mut out_rx) = mpsc::channel::<Message>(1024);
            client.outgoing_tx = Some(out_tx.clone());
            *client.shared.state.write().await = ConnectionState::Connected;
            let client = Arc::new(client);

            let mut tasks = Vec::new();
            for t in 0..4 {
                let client = client.clone();
                tasks.push(tokio::spawn(async move {
                    for i in 0..25 {
                        client.submit(CandidateEvent::chat(format!("{t}:{i}"))).await.unwrap();
                        tokio::task::yield_now().await;
                    }
                }));
            }
            let shared = client.shared.clone();
            let join = tokio::spawn(async move {
                tokio::task::yield_now().await;
                handle_server_message(joined_message(), &shared, &out_tx).await;
            });
            for task in tasks {
                task.await.unwrap();
            }
            join.await.unwrap();

            assert_eq!(client.connection_state().await, ConnectionState::Joined);
            assert_eq!(client.offline_queue_len().await, 0);
            let submits = sent(&mut out_rx)
                .into_iter()
                .filter(|m| matches!(m, ClientMessage::Submit { .. }))
                .count();
            assert_eq!(submits, 100);
        }
    }

    #[tokio::test]
    async fn test_resync_discards_state_and_replays_from_zero() {
        let mut client = RoomClient::new("ws://localhost:9090", "r1", "abc", "Alice");
        let _events = client.take_event_rx();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
        let shared = client.shared.clone();
        let (log, events) = log_with(4);

        handle_server_message(joined_message(), &shared, &out_tx).await;
        handle_server_message(ServerMessage::Event(events[0].clone()), &shared, &out_tx).await;
        handle_server_message(ServerMessage::Event(events[1].clone()), &shared, &out_tx).await;
        assert_eq!(client.next_sequence().await, 2);
        sent(&mut out_rx);

        handle_server_message(ServerMessage::Resync, &shared, &out_tx).await;
        assert_eq!(client.next_sequence().await, 0);
        assert_eq!(client.room_state().await, RoomState::default());
        assert_eq!(sent(&mut out_rx), vec![ClientMessage::Resubscribe { from_sequence: 0 }]);

        // A straggler from the dropped subscription is not a gap
        handle_server_message(ServerMessage::Event(events[3].clone()), &shared, &out_tx).await;
        assert!(sent(&mut out_rx).is_empty());

        for event in &events {
            handle_server_message(ServerMessage::Event(event.clone()), &shared, &out_tx).await;
        }
        assert_eq!(client.room_state().await, log.replay());
        let acks: Vec<ClientMessage> = (0..4).map(|sequence| ClientMessage::Ack { sequence }).collect();
        assert_eq!(sent(&mut out_rx), acks);
    }

    #[test]
    fn test_client_creation() {
        let client = RoomClient::new("ws://localhost:9090", "r1", "abc", "Alice");
        assert_eq!(client.room_id(), "r1");
        assert_eq!(client.display_name(), "Alice");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = RoomClient::new("ws://localhost:9090", "r1", "abc", "Alice");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.session_id().await, None);
        assert_eq!(client.next_sequence().await, 0);
        assert_eq!(client.offline_queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_submit_offline_queues() {
        let client = RoomClient::new("ws://localhost:9090", "r1", "abc", "Alice");
        let first = client.submit(CandidateEvent::chat("hi")).await.unwrap();
        let second = client.submit(CandidateEvent::chat("there")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(client.offline_queue_len().await, 2);

        // Queued candidates carry a dedup key
        let queued = client.shared.offline_queue.lock().await.drain();
        assert!(queued.iter().all(|(_, c)| c.client_event_id.is_some()));
    }

    #[tokio::test]
    async fn test_requests_fail_when_disconnected() {
        let client = RoomClient::new("ws://localhost:9090", "r1", "abc", "Alice");
        assert!(matches!(client.run_code().await, Err(ProtocolError::ConnectionClosed)));
        assert!(client.send_ping().await.is_err());
    }

    #[test]
    fn test_offline_queue_capacity() {
        let mut queue = OfflineQueue::new(2);
        assert!(queue.enqueue(1, CandidateEvent::chat("a")));
        assert!(queue.enqueue(2, CandidateEvent::chat("b")));
        assert!(!queue.enqueue(3, CandidateEvent::chat("c"))); // Full

        let drained = queue.drain();
        assert_eq!(drained.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(queue.is_empty());

        queue.enqueue(4, CandidateEvent::chat("d"));
        queue.clear();
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = RoomClient::new("ws://localhost:9090", "r1", "abc", "Alice");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
