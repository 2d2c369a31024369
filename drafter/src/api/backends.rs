//! Backend listing and switching.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::actors::backend_coordinator;
use crate::api::ApiState;

#[derive(Debug, Deserialize)]
pub struct SwitchBackendRequest {
    pub name: String,
}

pub async fn list_backends(State(state): State<ApiState>) -> impl IntoResponse {
    let coordinator = state.app_state.coordinator();
    match backend_coordinator::list_backends(&coordinator).await {
        Ok(backends) => (StatusCode::OK, Json(json!({ "backends": backends }))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to list backends: {e}") })),
        )
            .into_response(),
    }
}

pub async fn switch_backend(
    State(state): State<ApiState>,
    Json(req): Json<SwitchBackendRequest>,
) -> impl IntoResponse {
    let coordinator = state.app_state.coordinator();
    match backend_coordinator::switch_backend(&coordinator, req.name.clone()).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "switched": true, "current": req.name })),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "switched": false,
                "error": format!("Backend {} is unknown or unavailable", req.name)
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to switch backend: {e}") })),
        )
            .into_response(),
    }
}
