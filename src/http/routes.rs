use super::handlers;
use super::state::AppState;
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Run telemetry
        .route("/stats", get(handlers::get_stats))
        // Live sessions
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/:session_id", get(handlers::get_session))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status API until the task is dropped
pub async fn serve(bind: &str, port: u16, state: AppState) -> Result<()> {
    let listener = TcpListener::bind((bind, port))
        .await
        .with_context(|| format!("Failed to bind status API to {}:{}", bind, port))?;
    info!("Status API listening on {}:{}", bind, port);

    axum::serve(listener, create_router(state))
        .await
        .context("Status API failed")
}
