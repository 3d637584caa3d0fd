//! WebSocket room server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                   ┌── Room r1 ── SessionCoordinator ── EventLog
//!            ├── RoomRegistry ───┤                    │
//! Client B ──┘                   └── Room r2 ...      └── BroadcastGroup
//!                                                          │
//!                                              ┌───────────┼───────────┐
//!                                              ▼           ▼           ▼
//!                                          Client A    Client B    Client C
//! ```
//!
//! Each connection runs one task that multiplexes three sources: frames from
//! the socket, deliveries from its room subscription, and replies from
//! background work (code execution). A connection joins at most one room;
//! disconnecting leaves it.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapters 8 & 9

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::config::ServerConfig;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::RoomRegistry;
use crate::session::ParticipantSession;
use crate::subscription::{Delivery, Subscription};

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub active_sessions: usize,
    pub events_appended: u64,
    pub resyncs_forced: u64,
}

/// The room server.
pub struct RoomServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

impl RoomServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.coordinator()));
        Self::with_registry(config, registry)
    }

    /// Serve an existing registry (custom `AuthGate` / `CodeExecutor`).
    pub fn with_registry(config: ServerConfig, registry: Arc<RoomRegistry>) -> Self {
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connection counters merged with registry counters.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        let registry = self.registry.stats().await;
        stats.active_rooms = registry.active_rooms;
        stats.active_sessions = registry.active_sessions;
        stats.events_appended = registry.events_appended;
        stats.resyncs_forced = registry.resyncs_forced;
        stats
    }

    /// Start listening for WebSocket connections.
    ///
    /// Also starts the idle-room eviction sweeper. Runs until the listener
    /// fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Room server listening on {}", self.config.bind_addr);

        let sweeper = self
            .registry
            .spawn_eviction_sweeper(self.config.eviction_interval());

        let result = self.accept_loop(listener).await;
        sweeper.abort();
        result
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                {
                    let mut s = stats.write().await;
                    s.total_connections += 1;
                    s.active_connections += 1;
                }
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats.clone(), config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
                let mut s = stats.write().await;
                s.active_connections = s.active_connections.saturating_sub(1);
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> ConnectionResult {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        let threshold = config.compression_threshold;
        let mut session: Option<ParticipantSession> = None;
        let mut subscription: Option<Subscription> = None;
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let result: ConnectionResult = async {
            loop {
                tokio::select! {
                    // Incoming WebSocket message
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let bytes: Vec<u8> = data.into();
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += bytes.len() as u64;
                                }
                                let request = match ClientMessage::decode(&bytes) {
                                    Ok(request) => request,
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        let reply = ServerMessage::error(e.to_string());
                                        ws_sender.send(Message::Binary(reply.encode(threshold)?.into())).await?;
                                        continue;
                                    }
                                };
                                let replies = Self::handle_request(
                                    request,
                                    &registry,
                                    &mut session,
                                    &mut subscription,
                                    &reply_tx,
                                )
                                .await;
                                for reply in replies {
                                    ws_sender.send(Message::Binary(reply.encode(threshold)?.into())).await?;
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    // Outgoing room delivery
                    delivery = async {
                        if let Some(ref mut sub) = subscription {
                            sub.next().await
                        } else {
                            // Not joined yet: wait forever
                            std::future::pending().await
                        }
                    } => {
                        let reply = match delivery {
                            Some(Delivery::Event(event)) => ServerMessage::Event((*event).clone()),
                            Some(Delivery::Snapshot(state)) => ServerMessage::Snapshot(*state),
                            Some(Delivery::Resync) => {
                                subscription = None;
                                ServerMessage::Resync
                            }
                            None => {
                                subscription = None;
                                continue;
                            }
                        };
                        ws_sender.send(Message::Binary(reply.encode(threshold)?.into())).await?;
                    }

                    // Replies from background work
                    Some(reply) = reply_rx.recv() => {
                        ws_sender.send(Message::Binary(reply.encode(threshold)?.into())).await?;
                    }
                }
            }
            Ok(())
        }
        .await;

        // Cleanup: leave the room even when the connection failed
        if let Some(session) = session {
            registry.leave(&session.session_id()).await;
        }
        result
    }

    /// Apply one client request; returns the direct replies.
    async fn handle_request(
        request: ClientMessage,
        registry: &Arc<RoomRegistry>,
        session: &mut Option<ParticipantSession>,
        subscription: &mut Option<Subscription>,
        reply_tx: &mpsc::UnboundedSender<ServerMessage>,
    ) -> Vec<ServerMessage> {
        match request {
            ClientMessage::CreateRoom { passkey, room_id } => {
                let created = match room_id {
                    Some(room_id) => registry.create_room_with_id(&room_id, &passkey).await,
                    None => registry.create_room(&passkey).await,
                };
                vec![match created {
                    Ok(room_id) => ServerMessage::RoomCreated { room_id },
                    Err(e) => ServerMessage::CreateRejected(e),
                }]
            }

            ClientMessage::Join { room_id, passkey, display_name } => {
                if let Some(current) = session.take() {
                    *subscription = None;
                    registry.leave(&current.session_id()).await;
                }
                match registry.join(&room_id, &passkey, &display_name).await {
                    Ok(ack) => {
                        let reply = ServerMessage::Joined {
                            session_id: ack.session.session_id(),
                            room_id: ack.session.room_id().to_string(),
                            display_name: ack.session.display_name().to_string(),
                            snapshot: ack.snapshot,
                            events: ack.events.iter().map(|e| (**e).clone()).collect(),
                        };
                        *session = Some(ack.session);
                        *subscription = Some(ack.subscription);
                        vec![reply]
                    }
                    Err(e) => vec![ServerMessage::JoinRejected(e)],
                }
            }

            ClientMessage::Submit { request_id, candidate } => {
                let Some(current) = session.as_ref() else {
                    return vec![ServerMessage::error("join a room first")];
                };
                vec![match current.submit(candidate).await {
                    Ok(event) => ServerMessage::Submitted {
                        request_id,
                        sequence: event.sequence,
                    },
                    Err(error) => ServerMessage::SubmitRejected { request_id, error },
                }]
            }

            ClientMessage::Ack { sequence } => {
                let Some(current) = session.as_mut() else {
                    return vec![ServerMessage::error("join a room first")];
                };
                match registry.ack(&current.session_id(), sequence).await {
                    Ok(acked) => {
                        current.record_ack(acked);
                        Vec::new()
                    }
                    Err(e) => vec![ServerMessage::error(e.to_string())],
                }
            }

            ClientMessage::Resubscribe { from_sequence } => {
                let Some(current) = session.as_ref() else {
                    return vec![ServerMessage::error("join a room first")];
                };
                match current.subscribe(from_sequence).await {
                    Ok(sub) => {
                        *subscription = Some(sub);
                        Vec::new()
                    }
                    Err(e) => vec![ServerMessage::error(e.to_string())],
                }
            }

            ClientMessage::RunCode { request_id } => {
                let Some(current) = session.as_ref() else {
                    return vec![ServerMessage::error("join a room first")];
                };
                let registry = registry.clone();
                let session_id = current.session_id();
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let result = registry.run_code(&session_id).await;
                    let _ = reply_tx.send(ServerMessage::ExecutionResult { request_id, result });
                });
                Vec::new()
            }

            ClientMessage::Participants => {
                let Some(current) = session.as_ref() else {
                    return vec![ServerMessage::error("join a room first")];
                };
                vec![ServerMessage::Participants(current.coordinator().participants().await)]
            }

            ClientMessage::Leave => {
                *subscription = None;
                if let Some(current) = session.take() {
                    registry.leave(&current.session_id()).await;
                }
                Vec::new()
            }

            ClientMessage::Ping => vec![ServerMessage::Pong],
        }
    }
}
