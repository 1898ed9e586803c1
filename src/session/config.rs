use crate::transport::{ConnectionMode, StartParams};
use std::time::Duration;

/// Configuration shared by every coordinator of a run
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Parameters sent with every `start` (the token is filled per iteration)
    pub start: StartParams,

    /// New connection per request, or one per coordinator
    pub connection_mode: ConnectionMode,

    /// Bytes handed to each `send_frame` call
    /// Default: 100 ms of 16 kHz PCM
    pub frame_bytes: usize,

    /// Sleep between frames to approximate real-time playback
    pub pacing: bool,

    /// Wait for `Started` after `start`
    pub start_timeout: Duration,

    /// Wait for `Closed`/`TaskFailed` after `stop`
    pub stop_timeout: Duration,

    /// Delay before releasing a session that timed out, so late notices
    /// still find it
    pub release_grace: Duration,

    /// Iterations per coordinator; 0 repeats until the run is stopped
    pub loop_count: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let start = StartParams::default();
        Self {
            frame_bytes: start.format.default_frame_bytes(),
            start,
            connection_mode: ConnectionMode::PerRequest,
            pacing: true,
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            release_grace: Duration::from_secs(10), // worst late callback observed
            loop_count: 1,
        }
    }
}
