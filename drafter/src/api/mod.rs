//! HTTP and WebSocket routes for the drafter service.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod backends;
pub mod corpora;
pub mod requests;
pub mod websocket_generation;

use crate::app_state::AppState;
use crate::generation::SessionState;

/// Live generation sessions keyed by session id.
pub type GenerationSessions = Arc<Mutex<HashMap<String, Arc<std::sync::Mutex<SessionState>>>>>;

#[derive(Clone)]
pub struct ApiState {
    pub app_state: Arc<AppState>,
    pub sessions: GenerationSessions,
}

impl ApiState {
    pub fn new(app_state: AppState) -> Self {
        Self {
            app_state: Arc::new(app_state),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/ws/generate",
            get(websocket_generation::generation_websocket),
        )
        // Backend routes
        .route("/backends", get(backends::list_backends))
        .route("/backends/switch", post(backends::switch_backend))
        // Non-interactive generation and request registration
        .route("/generate", post(requests::generate_document))
        .route("/requests", post(requests::register_request))
        // Corpus indexing
        .route("/corpora/{corpus_id}/index", post(corpora::index_corpus))
}

pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let sessions = state.sessions.lock().await;
    let active = sessions
        .values()
        .filter(|s| {
            s.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .is_active()
        })
        .count();
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "drafter",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": sessions.len(),
            "activeGenerations": active,
        })),
    )
}
