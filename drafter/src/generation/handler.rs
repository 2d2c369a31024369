//! Where a generation's callbacks go.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use shared_types::{DocumentSection, ServerMessage};
use tokio::sync::mpsc;

use super::{ClarificationBridge, SessionState};
use crate::backends::BackendError;

#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn on_progress(&self, message: String);

    async fn on_section(&self, section: DocumentSection) -> Result<(), BackendError>;

    async fn on_clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError>;
}

/// Relays callbacks to one WebSocket session through its outbound queue.
///
/// Sends await queue capacity, so a slow client slows the generation rather
/// than losing events. A closed queue means the client is gone and surfaces
/// as [`BackendError::Cancelled`].
pub struct StreamingHandler {
    session_id: String,
    outbound: mpsc::Sender<ServerMessage>,
    bridge: Arc<ClarificationBridge>,
    state: Arc<Mutex<SessionState>>,
    clarification_timeout: Option<Duration>,
}

impl StreamingHandler {
    pub fn new(
        session_id: impl Into<String>,
        outbound: mpsc::Sender<ServerMessage>,
        bridge: Arc<ClarificationBridge>,
        state: Arc<Mutex<SessionState>>,
        clarification_timeout: Option<Duration>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            outbound,
            bridge,
            state,
            clarification_timeout,
        }
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    async fn send(&self, message: ServerMessage) -> Result<(), BackendError> {
        self.outbound.send(message).await.map_err(|_| {
            tracing::debug!(session_id = %self.session_id, "Outbound queue closed");
            BackendError::Cancelled
        })
    }
}

#[async_trait]
impl InteractionHandler for StreamingHandler {
    async fn on_progress(&self, message: String) {
        let _ = self.send(ServerMessage::Progress { message }).await;
    }

    async fn on_section(&self, section: DocumentSection) -> Result<(), BackendError> {
        tracing::debug!(
            session_id = %self.session_id,
            order = section.order,
            title = %section.title,
            "Relaying section"
        );
        self.send(ServerMessage::Section { section }).await
    }

    async fn on_clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError> {
        let pending = self.bridge.open_round(questions.clone())?;
        self.set_state(SessionState::AwaitingClarification);
        tracing::info!(
            session_id = %self.session_id,
            questions = questions.len(),
            "Awaiting clarification"
        );

        if let Err(e) = self.send(ServerMessage::ClarificationNeeded { questions }).await {
            self.bridge.cancel();
            return Err(e);
        }

        let answers = self
            .bridge
            .wait_with_timeout(pending, self.clarification_timeout)
            .await;
        self.set_state(SessionState::Generating);
        Ok(answers?)
    }
}

/// Non-interactive handler: records what it is told and answers every
/// question with an empty string.
#[derive(Debug, Default)]
pub struct SilentHandler {
    sections: Mutex<Vec<DocumentSection>>,
    progress: Mutex<Vec<String>>,
    questions: Mutex<Vec<String>>,
}

impl SilentHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> Vec<DocumentSection> {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn progress_messages(&self) -> Vec<String> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every question asked, across all rounds.
    pub fn questions(&self) -> Vec<String> {
        self.questions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InteractionHandler for SilentHandler {
    async fn on_progress(&self, message: String) {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    async fn on_section(&self, section: DocumentSection) -> Result<(), BackendError> {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(section);
        Ok(())
    }

    async fn on_clarify(&self, questions: Vec<String>) -> Result<Vec<String>, BackendError> {
        let answers = vec![String::new(); questions.len()];
        self.questions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(questions);
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming(capacity: usize) -> (
        Arc<StreamingHandler>,
        mpsc::Receiver<ServerMessage>,
        Arc<ClarificationBridge>,
        Arc<Mutex<SessionState>>,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let bridge = Arc::new(ClarificationBridge::new());
        let state = Arc::new(Mutex::new(SessionState::Generating));
        let handler = Arc::new(StreamingHandler::new(
            "session-1",
            tx,
            bridge.clone(),
            state.clone(),
            Some(Duration::from_secs(5)),
        ));
        (handler, rx, bridge, state)
    }

    #[tokio::test]
    async fn test_clarify_round_trip_updates_state() {
        let (handler, mut rx, bridge, state) = streaming(8);
        let asking = {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler
                    .on_clarify(vec!["What is the target platform?".to_string()])
                    .await
            })
        };

        match rx.recv().await.unwrap() {
            ServerMessage::ClarificationNeeded { questions } => {
                assert_eq!(questions, vec!["What is the target platform?"])
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(*state.lock().unwrap(), SessionState::AwaitingClarification);
        assert!(bridge.resolve(vec!["iOS".to_string()]));

        assert_eq!(asking.await.unwrap().unwrap(), vec!["iOS".to_string()]);
        assert_eq!(*state.lock().unwrap(), SessionState::Generating);
    }

    #[tokio::test]
    async fn test_cancelled_round_surfaces_as_cancelled() {
        let (handler, mut rx, bridge, _state) = streaming(8);
        let asking = {
            let handler = handler.clone();
            tokio::spawn(async move { handler.on_clarify(vec!["Q".to_string()]).await })
        };
        let _ = rx.recv().await.unwrap();
        bridge.cancel();
        assert_eq!(asking.await.unwrap().unwrap_err(), BackendError::Cancelled);
    }

    #[tokio::test]
    async fn test_closed_queue_cancels_sections() {
        let (handler, rx, _bridge, _state) = streaming(1);
        drop(rx);
        let err = handler
            .on_section(DocumentSection::new("Overview", "text", 1))
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Cancelled);
    }

    #[tokio::test]
    async fn test_silent_handler_answers_blank() {
        let handler = SilentHandler::new();
        let answers = handler
            .on_clarify(vec!["A?".to_string(), "B?".to_string()])
            .await
            .unwrap();
        assert_eq!(answers, vec![String::new(), String::new()]);
        assert_eq!(handler.questions().len(), 2);
    }
}
