//! Read-only session snapshots.  Commands go through the control socket.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /v1/sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.manager.list();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

/// GET /v1/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get(&id) {
        Some(info) => {
            let retries = state.manager.retry_count(&id);
            let mut body = serde_json::to_value(&info).unwrap_or_default();
            body["retry_count"] = retries.into();
            body["restart_pending"] = state.manager.has_pending_restart(&id).into();
            Json(body).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("session not found: {id}"),
                "code": "not_found",
            })),
        )
            .into_response(),
    }
}

/// GET /v1/bridges
pub async fn list_bridges(State(state): State<AppState>) -> impl IntoResponse {
    let bridges = state.bridges.list();
    Json(serde_json::json!({
        "bridges": bridges,
        "count": bridges.len(),
        "pending_requests": state.bridges.pending_count(),
    }))
}
