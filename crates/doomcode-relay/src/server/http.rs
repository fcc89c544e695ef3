//! Session bootstrap HTTP endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

use super::handlers::AppState;

/// `POST /session`: allocate a session id for a controller that will join
/// over the duplex transport afterwards.
pub async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = doomcode_core::new_id();
    match state.db.create_session(&session_id).await {
        Ok(_) => {
            info!(session_id = %session_id, "Session created over HTTP");
            (StatusCode::OK, Json(json!({ "sessionId": session_id })))
        }
        Err(e) => {
            warn!(error = %e, "HTTP session create failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "session create failed" })),
            )
        }
    }
}

/// `GET /session/:id`: slot occupancy and lifetime, for pairing UIs.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.db.get_live_session(&id).await {
        Ok(session) => (
            StatusCode::OK,
            Json(json!({
                "sessionId": session.id,
                "hasController": session.controller_connection_id.is_some(),
                "hasOperator": session.operator_connection_id.is_some(),
                "createdAt": session.created_at * 1000,
                "expiresAt": session.expires_at * 1000,
            })),
        ),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "session not found" })),
        ),
    }
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": doomcode_core::unix_timestamp_ms(),
    }))
}
