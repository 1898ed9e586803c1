//! Error types for configuration and transport failures

use thiserror::Error;

/// Invalid run configuration. Fatal: the run aborts before any session starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Concurrency must be at least 1")]
    NoConcurrency,

    #[error("Unsupported sample rate: {0} (expected 8000 or 16000)")]
    UnsupportedSampleRate(u32),

    #[error("Frame size must be non-zero")]
    EmptyFrame,

    #[error("Compression ratio must be at least 1")]
    InvalidCompressionRatio,

    #[error("No credential: pass --token")]
    MissingCredential,

    #[error("No audio source: pass --audio-file")]
    MissingAudio,

    #[error("Run duration must be non-zero when no loop count is given")]
    ZeroDuration,
}

/// Errors surfaced by a transport client.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to create session: {0}")]
    Create(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Channel closed")]
    Closed,

    #[error("Unknown transport handle: {0}")]
    UnknownHandle(u64),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;
