//! Per-connection handle for one joined participant.

use std::sync::Arc;

use interview_core::{CandidateEvent, Event, Sequence};
use uuid::Uuid;

use crate::collaborators::{CodeExecutor, ExecutionOutput};
use crate::coordinator::SessionCoordinator;
use crate::error::{RunCodeError, SubmitError};
use crate::subscription::Subscription;

/// One joined participant. Tracks the last acknowledged sequence so a
/// reconnect resumes exactly where delivery left off.
#[derive(Clone)]
pub struct ParticipantSession {
    session_id: Uuid,
    room_id: String,
    display_name: String,
    coordinator: Arc<SessionCoordinator>,
    last_acked: Option<Sequence>,
}

impl std::fmt::Debug for ParticipantSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantSession")
            .field("session_id", &self.session_id)
            .field("room_id", &self.room_id)
            .field("display_name", &self.display_name)
            .field("last_acked", &self.last_acked)
            .finish()
    }
}

impl ParticipantSession {
    pub(crate) fn new(
        session_id: Uuid,
        room_id: String,
        display_name: String,
        coordinator: Arc<SessionCoordinator>,
    ) -> Self {
        Self {
            session_id,
            room_id,
            display_name,
            coordinator,
            last_acked: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn last_acked(&self) -> Option<Sequence> {
        self.last_acked
    }

    /// Where a resumed subscription should start.
    pub fn resume_from(&self) -> Sequence {
        self.last_acked.map_or(0, |seq| seq + 1)
    }

    pub async fn submit(&self, candidate: CandidateEvent) -> Result<Arc<Event>, SubmitError> {
        self.coordinator.submit(self.session_id, candidate).await
    }

    /// Subscribe from an explicit sequence.
    pub async fn subscribe(&self, from: Sequence) -> Result<Subscription, SubmitError> {
        self.coordinator.subscribe(from).await
    }

    /// Subscribe from just past the last acknowledged event.
    pub async fn resume(&self) -> Result<Subscription, SubmitError> {
        self.coordinator.subscribe(self.resume_from()).await
    }

    /// Record that every event up to `sequence` has been applied locally.
    pub async fn ack(&mut self, sequence: Sequence) -> Result<Option<Sequence>, SubmitError> {
        let acked = self.coordinator.ack(self.session_id, sequence).await?;
        self.record_ack(acked);
        Ok(acked)
    }

    pub(crate) fn record_ack(&mut self, acked: Option<Sequence>) {
        self.last_acked = self.last_acked.max(acked);
    }

    pub async fn run_code(&self, executor: &dyn CodeExecutor) -> Result<ExecutionOutput, RunCodeError> {
        self.coordinator.run_code(self.session_id, executor).await
    }

    /// Leave the room. Returns `false` if already gone.
    pub async fn leave(self) -> bool {
        self.coordinator.leave(self.session_id).await
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::subscription::Delivery;

    async fn session(coord: &Arc<SessionCoordinator>, name: &str) -> ParticipantSession {
        let id = Uuid::new_v4();
        coord.join(id, name.to_string()).await.unwrap();
        ParticipantSession::new(id, coord.room_id().to_string(), name.to_string(), coord.clone())
    }

    #[tokio::test]
    async fn test_resume_after_ack() {
        let coord = Arc::new(SessionCoordinator::new("r1", CoordinatorConfig::for_testing()));
        let mut alice = session(&coord, "Alice").await;
        for i in 0..4 {
            alice.submit(CandidateEvent::chat(format!("m{i}"))).await.unwrap();
        }
        assert_eq!(alice.resume_from(), 0);

        alice.ack(1).await.unwrap();
        assert_eq!(alice.last_acked(), Some(1));

        let mut sub = alice.resume().await.unwrap();
        let mut resumed = Vec::new();
        while let Some(Delivery::Event(event)) = sub.try_next() {
            resumed.push(event.sequence);
        }
        assert_eq!(resumed, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_leave_ends_membership() {
        let coord = Arc::new(SessionCoordinator::new("r1", CoordinatorConfig::for_testing()));
        let bob = session(&coord, "Bob").await;
        let copy = bob.clone();
        assert!(bob.leave().await);
        assert_eq!(
            copy.submit(CandidateEvent::chat("late")).await,
            Err(SubmitError::SessionNotFound)
        );
    }
}
