//! Cross-session telemetry
//!
//! - Latency statistics per phase, globally and per worker
//! - Outcome counters
//! - Start-acknowledgment histogram
//! - Failure log and report rendering

mod aggregator;
mod failure_log;
pub mod report;
mod stats;

pub use aggregator::{TelemetryAggregator, TelemetrySnapshot};
pub use failure_log::{FailureLog, FailureRecord};
pub use stats::{AudioStats, Counter, Counters, LatencyPhase, PhaseStats, SendStats, StartHistogram};
