//! Server and coordinator configuration.
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional JSON
//! file, then `INTERVIEW_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum participants per room
    pub max_participants_per_room: usize,
    /// Events buffered per participant before it is forced to resync
    pub participant_buffer: usize,
    /// Wait limit for a room's serialization point (submit, join, catch-up)
    pub operation_timeout_ms: u64,
    /// Wait limit for the code executor
    pub execution_timeout_ms: u64,
    /// How long an empty room survives before eviction
    pub idle_grace_secs: u64,
    /// Interval between eviction sweeps
    pub eviction_interval_secs: u64,
    /// Retained log length before acknowledged events are compacted
    /// (None = keep everything)
    pub retained_events: Option<usize>,
    /// Frames at least this large are LZ4-compressed on the wire
    pub compression_threshold: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_participants_per_room: 16,
            participant_buffer: 256,
            operation_timeout_ms: 5_000,
            execution_timeout_ms: 10_000,
            idle_grace_secs: 600,
            eviction_interval_secs: 60,
            retained_events: None,
            compression_threshold: 16 * 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults, then `path` (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `INTERVIEW_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("INTERVIEW_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(raw) = lookup("INTERVIEW_MAX_PARTICIPANTS") {
            self.max_participants_per_room = parse_number("INTERVIEW_MAX_PARTICIPANTS", raw)?;
        }
        if let Some(raw) = lookup("INTERVIEW_IDLE_GRACE_SECS") {
            self.idle_grace_secs = parse_number("INTERVIEW_IDLE_GRACE_SECS", raw)?;
        }
        if let Some(raw) = lookup("INTERVIEW_RETAINED_EVENTS") {
            self.retained_events = Some(parse_number("INTERVIEW_RETAINED_EVENTS", raw)?);
        }
        Ok(self)
    }

    /// Per-room settings derived from this config.
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_participants: self.max_participants_per_room,
            participant_buffer: self.participant_buffer,
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            execution_timeout: Duration::from_millis(self.execution_timeout_ms),
            idle_grace: Duration::from_secs(self.idle_grace_secs),
            retained_events: self.retained_events,
        }
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value: raw })
}

/// Settings shared by every room's coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub max_participants: usize,
    pub participant_buffer: usize,
    pub operation_timeout: Duration,
    pub execution_timeout: Duration,
    pub idle_grace: Duration,
    pub retained_events: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        ServerConfig::default().coordinator()
    }
}

impl CoordinatorConfig {
    /// Config for testing (tiny buffers, short timeouts, no grace period).
    pub fn for_testing() -> Self {
        Self {
            max_participants: 8,
            participant_buffer: 16,
            operation_timeout: Duration::from_millis(200),
            execution_timeout: Duration::from_millis(200),
            idle_grace: Duration::ZERO,
            retained_events: None,
        }
    }
}
