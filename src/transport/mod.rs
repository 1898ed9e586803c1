//! Client surface of the recognition service
//!
//! A transport accepts `start`/`send_frame`/`stop` calls and reports what
//! happened later, on its own delivery path, through an [`EventSink`].
//! Nothing here waits for those notices; that is the coordinator's job.

mod events;
pub mod simulated;

pub use events::{event_channel, EventKind, EventSink, EventStream, TransportEvent, STATUS_OK};
pub use simulated::{SimulatedTransport, SimulationProfile, SimulationStats};

use crate::audio::{AudioEncoding, AudioFormat};
use crate::error::TransportResult;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Connection lifetime relative to recognition requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// New connection for every request, released after it
    #[default]
    PerRequest,
    /// One connection per worker, reused by consecutive requests
    LongLived,
}

/// Opaque reference to transport-side resources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHandle {
    pub id: u64,
    pub mode: ConnectionMode,
}

/// Recognition parameters sent with `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartParams {
    pub format: AudioFormat,
    /// Silence (ms) that ends a sentence; `None` leaves the service default
    pub max_sentence_silence_ms: Option<u32>,
    pub intermediate_results: bool,
    pub punctuation: bool,
    pub inverse_text_normalization: bool,
    pub token: String,
}

impl Default for StartParams {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            max_sentence_silence_ms: None,
            intermediate_results: true,
            punctuation: true,
            inverse_text_normalization: true,
            token: String::new(),
        }
    }
}

/// Recognition service client
///
/// Implementations:
/// - [`SimulatedTransport`]: in-process service double
/// - [`crate::nats::NatsTransport`]: JSON over NATS subjects
#[async_trait]
pub trait Transport: Send + Sync {
    /// Allocate a request/connection
    async fn create(&self, session_id: &str, mode: ConnectionMode) -> TransportResult<TransportHandle>;

    /// Begin a recognition request; events for it are tagged with `session_id`.
    ///
    /// `Ok` only means the request was accepted for sending, the service
    /// acknowledges later with a `Started` (or `TaskFailed`) event.
    async fn start(&self, handle: &TransportHandle, session_id: &str, params: &StartParams) -> TransportResult<()>;

    /// Push one audio frame. Any error is terminal for the request.
    ///
    /// The success value is transport-specific and is not a byte count.
    async fn send_frame(&self, handle: &TransportHandle, frame: &[u8], encoding: AudioEncoding) -> TransportResult<usize>;

    /// Finish the request; `Completed`/`Closed` or `TaskFailed` follow
    async fn stop(&self, handle: &TransportHandle) -> TransportResult<()>;

    /// Abort the request and suppress further events where possible
    async fn cancel(&self, handle: &TransportHandle) -> TransportResult<()>;

    /// Drop per-request state (event subscriptions, bindings) of a session
    /// that will not be routed any more. The handle itself stays usable.
    async fn finish(&self, handle: &TransportHandle, session_id: &str);

    /// Free transport-side resources. Only called after a terminal phase
    /// or once the late-event grace period has elapsed.
    async fn release(&self, handle: TransportHandle);

    /// Transport name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handles_distinguish_connection_mode() {
        let handles: HashSet<TransportHandle> = [
            TransportHandle { id: 1, mode: ConnectionMode::PerRequest },
            TransportHandle { id: 1, mode: ConnectionMode::LongLived },
            TransportHandle { id: 1, mode: ConnectionMode::PerRequest },
        ]
        .into_iter()
        .collect();
        assert_eq!(handles.len(), 2);
    }
}
