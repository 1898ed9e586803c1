use crate::dispatcher::EventDispatcher;
use crate::telemetry::TelemetryAggregator;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub telemetry: Arc<TelemetryAggregator>,
    /// Source of live session phases
    pub dispatcher: Arc<EventDispatcher>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            telemetry: Arc::clone(dispatcher.telemetry()),
            dispatcher,
            started_at: Instant::now(),
        }
    }
}
