//! Single-slot rendezvous between a suspended generation and the client.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::backends::BackendError;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ClarificationError {
    #[error("clarification cancelled")]
    Cancelled,
    #[error("clarification timed out")]
    TimedOut,
    #[error("a clarification round is already outstanding")]
    RoundAlreadyOutstanding,
}

impl From<ClarificationError> for BackendError {
    fn from(e: ClarificationError) -> Self {
        match e {
            ClarificationError::Cancelled => BackendError::Cancelled,
            ClarificationError::TimedOut => BackendError::Timeout,
            ClarificationError::RoundAlreadyOutstanding => {
                BackendError::UnsupportedFeature("concurrent clarification rounds".to_string())
            }
        }
    }
}

struct PendingRound {
    questions: Vec<String>,
    reply: oneshot::Sender<Vec<String>>,
}

/// At most one outstanding round. The waiter is registered before the
/// questions leave the process, so an answer can never arrive early.
#[derive(Default)]
pub struct ClarificationBridge {
    slot: Mutex<Option<PendingRound>>,
}

/// Receiving half of an open round.
pub struct PendingAnswers {
    rx: oneshot::Receiver<Vec<String>>,
}

impl PendingAnswers {
    pub async fn wait(self) -> Result<Vec<String>, ClarificationError> {
        self.rx.await.map_err(|_| ClarificationError::Cancelled)
    }
}

impl ClarificationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `questions`. A round whose waiter has gone away
    /// (its task was dropped) is replaced; a live one is not.
    pub fn open_round(&self, questions: Vec<String>) -> Result<PendingAnswers, ClarificationError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = slot.as_ref() {
            if !pending.reply.is_closed() {
                return Err(ClarificationError::RoundAlreadyOutstanding);
            }
        }
        let (reply, rx) = oneshot::channel();
        *slot = Some(PendingRound { questions, reply });
        Ok(PendingAnswers { rx })
    }

    pub async fn ask(&self, questions: Vec<String>) -> Result<Vec<String>, ClarificationError> {
        self.open_round(questions)?.wait().await
    }

    /// Wait for `pending` up to `timeout`, cancelling the round on expiry.
    pub async fn wait_with_timeout(
        &self,
        pending: PendingAnswers,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>, ClarificationError> {
        let Some(timeout) = timeout else {
            return pending.wait().await;
        };
        match tokio::time::timeout(timeout, pending.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel();
                Err(ClarificationError::TimedOut)
            }
        }
    }

    /// Fulfil the outstanding round. Returns `false`, doing nothing, when no
    /// round is open.
    pub fn resolve(&self, answers: Vec<String>) -> bool {
        let pending = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(round) => round.reply.send(answers).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter so a suspended `ask` observes cancellation.
    pub fn cancel(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn outstanding_questions(&self) -> Option<Vec<String>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|round| !round.reply.is_closed())
            .map(|round| round.questions.clone())
    }
}
