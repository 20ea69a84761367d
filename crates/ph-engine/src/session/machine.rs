//! Orchestrator session state machine
//!
//! Pure transition logic with a single `advance` entry point. The async
//! driver feeds it completion events; it never performs I/O itself.

use ph_core::OrchestratorStatus;
use thiserror::Error;

/// Completion events that drive the session forward (or back to the start)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Enroll command or automatic reconnect
    Start,
    /// Device-code flow started; user action pending
    DeviceFlowStarted,
    /// Token obtained
    TokenObtained,
    /// Workspace resolved
    SpaceResolved,
    /// Project resolved; enrollment complete
    ProjectResolved,
    /// Reset, failure or connectivity loss
    Disconnect,
}

/// An event that is not legal in the current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal session transition from '{from}' on {event:?}")]
pub struct TransitionError {
    pub from: OrchestratorStatus,
    pub event: SessionEvent,
}

/// Current status plus a generation counter identifying the live flow.
///
/// The generation changes on every `Start` and `Disconnect`, so results of
/// a cancelled flow can be recognised and discarded when they arrive late.
#[derive(Debug, Default)]
pub struct SessionMachine {
    status: OrchestratorStatus,
    generation: u64,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> OrchestratorStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply an event, returning the new status
    pub fn advance(&mut self, event: SessionEvent) -> Result<OrchestratorStatus, TransitionError> {
        use OrchestratorStatus as S;

        let next = match (self.status, event) {
            (_, SessionEvent::Disconnect) => S::Disconnected,
            (S::Disconnected, SessionEvent::Start) => S::Connecting,
            (S::Connecting, SessionEvent::DeviceFlowStarted) => S::WaitingForToken,
            (S::WaitingForToken, SessionEvent::TokenObtained) => S::RetrievingSpace,
            (S::RetrievingSpace, SessionEvent::SpaceResolved) => S::RetrievingProject,
            (S::RetrievingProject, SessionEvent::ProjectResolved) => S::Connected,
            (from, event) => return Err(TransitionError { from, event }),
        };
        debug_assert!(next == S::Disconnected || self.status.next() == Some(next));

        if matches!(event, SessionEvent::Start | SessionEvent::Disconnect) {
            self.generation += 1;
        }
        self.status = next;
        Ok(next)
    }
}
