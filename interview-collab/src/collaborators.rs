//! Opaque collaborators the coordinator consumes but does not implement.
//!
//! - [`AuthGate`] decides whether a display name may enter a room. The
//!   registry trusts its verdict.
//! - [`CodeExecutor`] runs the code panel's document in some sandbox. Results
//!   go back to the requester only and never enter the event log.

use futures_util::future::BoxFuture;
use interview_core::{AuthorId, Language, SYSTEM_AUTHOR_NAME};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;

/// Identity check run before a participant is admitted.
pub trait AuthGate: Send + Sync {
    /// Return the display name to use in the room, or a reason for refusal.
    fn admit(&self, room_id: &str, display_name: &str) -> Result<String, String>;
}

/// Default gate: trims the name, refuses empty, overlong or reserved names.
#[derive(Debug, Clone)]
pub struct DisplayNameGate {
    pub max_len: usize,
}

impl Default for DisplayNameGate {
    fn default() -> Self {
        Self { max_len: 64 }
    }
}

impl AuthGate for DisplayNameGate {
    fn admit(&self, _room_id: &str, display_name: &str) -> Result<String, String> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err("display name is required".to_string());
        }
        if name.chars().count() > self.max_len {
            return Err(format!("display name is longer than {} characters", self.max_len));
        }
        if name.eq_ignore_ascii_case(SYSTEM_AUTHOR_NAME) {
            return Err(format!("display name {name:?} is reserved"));
        }
        Ok(name.to_string())
    }
}

/// What to run: the code panel's current document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub room_id: String,
    pub requested_by: AuthorId,
    pub language: Language,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit status; `None` if the sandbox killed it.
    pub exit_status: Option<i32>,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Sandboxed code runner.
pub trait CodeExecutor: Send + Sync {
    fn execute(&self, request: ExecutionRequest)
        -> BoxFuture<'static, Result<ExecutionOutput, ExecutionError>>;
}

/// Executor used when no sandbox is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableExecutor;

impl CodeExecutor for UnavailableExecutor {
    fn execute(
        &self,
        request: ExecutionRequest,
    ) -> BoxFuture<'static, Result<ExecutionOutput, ExecutionError>> {
        log::debug!(
            "Execution of {} requested in room {} but no executor is configured",
            request.language.as_str(),
            request.room_id
        );
        Box::pin(async { Err(ExecutionError::Unavailable) })
    }
}
