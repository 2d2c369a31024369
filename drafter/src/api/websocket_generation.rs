//! WebSocket session gateway for interactive generation.
//!
//! One socket is one session. Inbound frames are parsed on the reading task
//! and generation runs on its own task. A single writer task owns the socket
//! and drains two queues: generation events (bounded, so a slow client slows
//! the generation) and gateway replies (unbounded, so the reading task never
//! waits and never drops one). Events within each queue keep their order.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use shared_types::{ClientMessage, GenerationRequest, Priority, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::ApiState;
use crate::app_state::AppState;
use crate::correlation::{resolve_request_identity, RequestIdentity};
use crate::generation::{ClarificationBridge, SessionState, StreamingHandler};

pub async fn generation_websocket(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_generation_socket(socket, state))
}

async fn handle_generation_socket(socket: WebSocket, api: ApiState) {
    let app = api.app_state.clone();
    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::channel::<ServerMessage>(app.config().outbound_capacity);
    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let mut session = GenerationSession::new(events_tx, replies_tx, app.config().clarification_timeout);
    let session_id = session.id.clone();
    tracing::info!(session_id = %session_id, "Generation session connected");

    let writer_session_id = session_id.clone();
    let writer = tokio::spawn(async move {
        let mut seq: u64 = 0;
        loop {
            let message = tokio::select! {
                biased;
                Some(message) = replies_rx.recv() => message,
                Some(message) = events_rx.recv() => message,
                else => break,
            };
            seq += 1;
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(session_id = %writer_session_id, error = %e, "Failed to encode outbound event");
                    continue;
                }
            };
            tracing::trace!(session_id = %writer_session_id, seq, kind = message.kind(), "Outbound event");
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    api.sessions
        .lock()
        .await
        .insert(session_id.clone(), session.state.clone());
    session.reply(ServerMessage::Connected {
        session_id: session_id.clone(),
    });

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => session.handle_text(text.as_str(), &app),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "Generation websocket receive error");
                break;
            }
        }
    }

    session.shutdown();
    api.sessions.lock().await.remove(&session_id);
    writer.abort();
    tracing::info!(session_id = %session_id, "Generation session closed");
}

/// State owned by one connection.
struct GenerationSession {
    id: String,
    state: Arc<Mutex<SessionState>>,
    bridge: Arc<ClarificationBridge>,
    /// Generation events; sends wait for capacity
    outbound: mpsc::Sender<ServerMessage>,
    /// Gateway replies (`connected`, `pong`, rejections)
    replies: mpsc::UnboundedSender<ServerMessage>,
    clarification_timeout: Option<Duration>,
    task: Option<JoinHandle<()>>,
}

impl GenerationSession {
    fn new(
        outbound: mpsc::Sender<ServerMessage>,
        replies: mpsc::UnboundedSender<ServerMessage>,
        clarification_timeout: Duration,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            bridge: Arc::new(ClarificationBridge::new()),
            outbound,
            replies,
            clarification_timeout: (!clarification_timeout.is_zero()).then_some(clarification_timeout),
            task: None,
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Enqueue from the reading task without ever waiting on the writer.
    fn reply(&self, message: ServerMessage) {
        if self.replies.send(message).is_err() {
            tracing::debug!(session_id = %self.id, "Gateway reply after writer closed");
        }
    }

    fn handle_text(&mut self, text: &str, app: &AppState) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "Malformed inbound message");
                self.reply(ServerMessage::error(format!("invalid message: {e}")));
                return;
            }
        };

        match message {
            ClientMessage::StartGeneration {
                prd_request_id,
                title,
                description,
                priority,
                preferred_backend,
                generate_command,
            } => {
                let request = match build_request(
                    title,
                    description,
                    priority,
                    preferred_backend,
                    generate_command,
                ) {
                    Ok(request) => request,
                    Err(message) => {
                        self.reply(ServerMessage::error(message));
                        return;
                    }
                };
                self.start_generation(request, prd_request_id, app);
            }
            ClientMessage::ClarificationAnswers { answers } => {
                if !self.bridge.resolve(answers) {
                    tracing::debug!(session_id = %self.id, "Answers received with no outstanding round");
                }
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong),
        }
    }

    fn start_generation(
        &mut self,
        request: GenerationRequest,
        prd_request_id: Option<String>,
        app: &AppState,
    ) {
        let current = self.current_state();
        if current.is_active() {
            self.reply(ServerMessage::error(format!(
                "a generation is already running (state: {})",
                current.as_str()
            )));
            return;
        }
        self.set_state(SessionState::Generating);
        tracing::info!(
            session_id = %self.id,
            title = %request.title,
            prd_request_id = ?prd_request_id,
            "Starting generation attempt"
        );

        let handler = Arc::new(StreamingHandler::new(
            self.id.clone(),
            self.outbound.clone(),
            self.bridge.clone(),
            self.state.clone(),
            self.clarification_timeout,
        ));
        let orchestrator = app.orchestrator();
        let requests = app.requests();
        let window = app.config().correlation_window;
        let outbound = self.outbound.clone();
        let state = self.state.clone();
        let session_id = self.id.clone();

        self.task = Some(tokio::spawn(async move {
            let identity = resolve_request_identity(
                requests.as_ref(),
                prd_request_id.as_deref(),
                &request.title,
                window,
            )
            .await;
            match &identity {
                RequestIdentity::Correlated { requested, resolved } => {
                    let _ = outbound
                        .send(ServerMessage::progress(format!(
                            "Request {requested} matched recent request {resolved}"
                        )))
                        .await;
                }
                RequestIdentity::Unresolved(id) => {
                    let _ = outbound
                        .send(ServerMessage::progress(format!(
                            "Request {id} not found; continuing without it"
                        )))
                        .await;
                }
                RequestIdentity::Anonymous | RequestIdentity::Known(_) => {}
            }

            let result = orchestrator
                .run(request, identity.effective_id(), handler)
                .await;
            let (outcome, next_state) = match result {
                Ok(document) => {
                    tracing::info!(
                        session_id = %session_id,
                        sections = document.sections.len(),
                        backend = %document.backend,
                        "Generation complete"
                    );
                    (
                        ServerMessage::GenerationComplete { result: document },
                        SessionState::Complete,
                    )
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Generation failed");
                    (ServerMessage::error(e.to_string()), SessionState::Failed)
                }
            };

            // The terminal event is enqueued under the state lock, so a new
            // start is only accepted once the outcome is already queued.
            match outbound.reserve().await {
                Ok(permit) => {
                    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
                    *guard = next_state;
                    permit.send(outcome);
                }
                Err(_) => {
                    *state.lock().unwrap_or_else(PoisonError::into_inner) = next_state;
                }
            }
        }));
    }

    /// Stop any in-flight attempt; a suspended clarification observes
    /// cancellation.
    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.bridge.cancel();
        if self.current_state().is_active() {
            self.set_state(SessionState::Failed);
        }
    }
}

/// Accept a full `generateCommand` or the `title`/`description` shorthand.
fn build_request(
    title: Option<String>,
    description: Option<String>,
    priority: Option<Priority>,
    preferred_backend: Option<String>,
    generate_command: Option<GenerationRequest>,
) -> Result<GenerationRequest, String> {
    if let Some(command) = generate_command {
        if command.preferred_backend.is_none() && preferred_backend.is_some() {
            return Ok(command.with_preferred_backend(preferred_backend));
        }
        return Ok(command);
    }

    match (title, description) {
        (Some(title), Some(description))
            if !title.trim().is_empty() && !description.trim().is_empty() =>
        {
            Ok(
                GenerationRequest::new(title, description, priority.unwrap_or_default())
                    .with_preferred_backend(preferred_backend),
            )
        }
        _ => Err("start_generation requires generateCommand or title and description".to_string()),
    }
}
