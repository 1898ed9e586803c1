//! Session lifecycle management
//!
//! This module provides the per-session state machine that:
//! - Starts a recognition request and waits (bounded) for its acknowledgment
//! - Streams audio frames with optional real-time pacing
//! - Stops the request and waits (bounded) for the closing notice
//! - Defers resource release while late notices may still arrive

mod config;
mod coordinator;
mod handle;
mod phase;

pub use config::SessionConfig;
pub use coordinator::{CoordinatorReport, IterationOutcome, IterationReport, SessionContext, SessionCoordinator};
pub use handle::{PhaseInstants, SentenceRecord, SessionHandle, Transition};
pub use phase::{Phase, SessionId};
