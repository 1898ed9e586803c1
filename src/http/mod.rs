//! HTTP API for watching a running load test
//!
//! - GET /health - Health check
//! - GET /stats - Telemetry snapshot
//! - GET /sessions - Live sessions and their phases
//! - GET /sessions/:id - One live session

mod handlers;
mod routes;
mod state;

pub use routes::{create_router, serve};
pub use state::AppState;
