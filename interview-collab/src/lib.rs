//! # interview-collab — Runtime for shared interview rooms
//!
//! Sequences participant actions per room and delivers them to every
//! participant in one total order, over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ RoomClient  │ ◄─────────────────► │ RoomServer  │
//! │ (per user)  │     Binary Proto    │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ LocalReplica│                     │RoomRegistry │
//! │ (RoomState) │                     └──────┬──────┘
//! └─────────────┘                            │ one per room
//!                                    ┌───────┴────────────┐
//!                                    │ SessionCoordinator │
//!                                    │ EventLog + fan-out │
//!                                    └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`] — Per-room serialization point: submit, subscribe, ack
//! - [`registry`] — Room lifecycle, passkey-gated join, idle eviction
//! - [`session`] — Per-participant handle with resumable delivery
//! - [`subscription`] — Gap-free catch-up then live delivery, with Resync
//! - [`broadcast`] — Bounded fan-out of sequenced events
//! - [`protocol`] — Binary wire protocol (bincode + optional LZ4)
//! - [`server`] — WebSocket room server
//! - [`client`] — WebSocket room client with offline queue
//! - [`collaborators`] — `AuthGate` and `CodeExecutor` seams
//! - [`config`] — Server configuration (JSON file + environment)

pub mod broadcast;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod subscription;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use client::{create_room, ClientEvent, ConnectionState, LocalReplica, OfflineQueue, ReplicaUpdate, RoomClient};
pub use collaborators::{AuthGate, CodeExecutor, DisplayNameGate, ExecutionOutput, ExecutionRequest, UnavailableExecutor};
pub use config::{ConfigError, CoordinatorConfig, ServerConfig};
pub use coordinator::{CatchUp, CoordinatorStats, ParticipantInfo, SessionCoordinator};
pub use error::{CreateRoomError, ExecutionError, JoinError, RunCodeError, SubmitError};
pub use protocol::{ClientMessage, FrameEncoding, ProtocolError, ServerMessage};
pub use registry::{JoinAck, RegistryStats, Room, RoomRegistry};
pub use server::{RoomServer, ServerStats};
pub use session::ParticipantSession;
pub use subscription::{Delivery, Subscription};
