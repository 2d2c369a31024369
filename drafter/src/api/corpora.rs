use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::ApiState;
use crate::collaborators::CollaboratorError;
use crate::retrieval::RetrievalError;

/// Build or rebuild the chunk index for one corpus.
pub async fn index_corpus(
    Path(corpus_id): Path<String>,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let retriever = state.app_state.retriever();
    match retriever.index_corpus(&corpus_id).await {
        Ok(report) => (StatusCode::OK, Json(json!(report))).into_response(),
        Err(RetrievalError::Corpus(CollaboratorError::NotFound(what))) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Corpus not found: {what}") })),
        )
            .into_response(),
        Err(RetrievalError::Corpus(CollaboratorError::InvalidPath(path))) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Invalid corpus path: {path}") })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Indexing failed: {e}") })),
        )
            .into_response(),
    }
}
