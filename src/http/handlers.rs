use super::state::AppState;
use crate::dispatcher::SessionSummary;
use crate::telemetry::TelemetrySnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: u64,
    pub live_sessions: usize,
    pub telemetry: TelemetrySnapshot,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /stats
/// Telemetry collected so far
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    let response = StatsResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        live_sessions: state.dispatcher.live_sessions().len(),
        telemetry: state.telemetry.snapshot(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// GET /sessions
/// Sessions that can still receive events
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<SessionSummary> = state.dispatcher.live_sessions();
    (StatusCode::OK, Json(sessions)).into_response()
}

/// GET /sessions/:session_id
pub async fn get_session(State(state): State<AppState>, Path(session_id): Path<String>) -> impl IntoResponse {
    match state
        .dispatcher
        .live_sessions()
        .into_iter()
        .find(|session| session.session_id == session_id)
    {
        Some(session) => (StatusCode::OK, Json(session)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
