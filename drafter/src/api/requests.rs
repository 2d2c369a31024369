//! Request registration and non-interactive generation.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use shared_types::GenerationRequest;

use crate::api::ApiState;
use crate::correlation::resolve_request_identity;
use crate::generation::{SessionError, SilentHandler};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub title: String,
    #[serde(default)]
    pub corpus_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    #[serde(default)]
    pub prd_request_id: Option<String>,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

pub async fn register_request(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if req.title.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "title is required" })),
        )
            .into_response();
    }
    let persisted = state.app_state.requests().create(req.title);
    if let Some(corpus_id) = req.corpus_id.filter(|c| !c.trim().is_empty()) {
        state.app_state.corpus_links().link(persisted.id.clone(), corpus_id);
    }
    tracing::info!(request_id = %persisted.id, "Registered request");
    (StatusCode::CREATED, Json(json!(persisted))).into_response()
}

/// Run a full generation without a socket. Clarifying questions are answered
/// with empty strings.
pub async fn generate_document(
    State(state): State<ApiState>,
    Json(body): Json<GenerateBody>,
) -> impl IntoResponse {
    let app = &state.app_state;
    let identity = resolve_request_identity(
        app.requests().as_ref(),
        body.prd_request_id.as_deref(),
        &body.request.title,
        app.config().correlation_window,
    )
    .await;

    let handler = Arc::new(SilentHandler::new());
    match app
        .orchestrator()
        .run(body.request, identity.effective_id(), handler.clone())
        .await
    {
        Ok(document) => (
            StatusCode::OK,
            Json(json!({
                "document": document,
                "progress": handler.progress_messages(),
                "unansweredQuestions": handler.questions(),
            })),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                SessionError::Validation(_) => StatusCode::BAD_REQUEST,
                SessionError::NotFound(_) => StatusCode::NOT_FOUND,
                SessionError::ProcessingFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
