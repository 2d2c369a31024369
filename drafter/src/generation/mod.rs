//! Generation attempts: orchestration, client interaction and clarification.

pub mod clarification;
pub mod handler;
pub mod orchestrator;

use serde::Serialize;

use crate::backends::BackendError;

pub use clarification::{ClarificationBridge, ClarificationError, PendingAnswers};
pub use handler::{InteractionHandler, SilentHandler, StreamingHandler};
pub use orchestrator::{GenerationSettings, Orchestrator};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
}

impl From<BackendError> for SessionError {
    fn from(e: BackendError) -> Self {
        SessionError::ProcessingFailed(e.to_string())
    }
}

/// Lifecycle of one connection's generation.
///
/// `Complete` and `Failed` are terminal for an attempt, not for the
/// connection: a fresh `start_generation` moves back to `Generating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Generating,
    AwaitingClarification,
    Complete,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::AwaitingClarification => "awaiting_clarification",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// An attempt is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Generating | Self::AwaitingClarification)
    }
}
