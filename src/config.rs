use crate::audio::{AudioEncoding, AudioFormat};
use crate::error::ConfigError;
use crate::pool::PoolConfig;
use crate::session::SessionConfig;
use crate::transport::{ConnectionMode, StartParams};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::warn;

/// Accepted end-of-sentence silence; anything else keeps the service default
pub const SENTENCE_SILENCE_RANGE_MS: RangeInclusive<u32> = 200..=2000;

/// Run length when no loop count is given
const DEFAULT_DURATION_SECS: u64 = 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub audio: AudioConfig,
    pub recognition: RecognitionConfig,
    pub timeouts: TimeoutConfig,
    pub transport: TransportConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub concurrency: usize,
    pub connection_mode: ConnectionMode,
    /// Iterations per worker; 0 runs for `duration_secs`
    pub loop_count: u32,
    pub duration_secs: Option<u64>,
    pub pacing: bool,
    pub failure_log: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            connection_mode: ConnectionMode::PerRequest,
            loop_count: 0,
            duration_secs: None,
            pacing: true,
            failure_log: "transcriptionTaskFailed.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sources assigned to workers round-robin
    pub files: Vec<String>,
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    /// Bytes per send; derived from the encoding when unset
    pub frame_bytes: Option<usize>,
    pub compression_ratio: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            encoding: AudioEncoding::Pcm,
            sample_rate: 16000,
            frame_bytes: None,
            compression_ratio: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub max_sentence_silence_ms: Option<u32>,
    pub intermediate_results: bool,
    pub punctuation: bool,
    pub inverse_text_normalization: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            max_sentence_silence_ms: None,
            intermediate_results: true,
            punctuation: true,
            inverse_text_normalization: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub start_ms: u64,
    pub stop_ms: u64,
    pub release_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            start_ms: 5000,
            stop_ms: 5000,
            release_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Nats,
    /// In-process service double
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub nats_url: String,
    pub token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Nats,
            nats_url: "nats://localhost:4222".to_string(),
            token: None,
            token_expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    /// Status API is only served when a port is set
    pub port: Option<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: None,
        }
    }
}

impl Config {
    /// Load from an optional file, then `ASR_LOADTEST__SECTION__KEY`
    /// environment variables
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("ASR_LOADTEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.concurrency == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if !matches!(self.audio.sample_rate, 8000 | 16000) {
            return Err(ConfigError::UnsupportedSampleRate(self.audio.sample_rate));
        }
        if self.audio.frame_bytes == Some(0) {
            return Err(ConfigError::EmptyFrame);
        }
        if self.audio.compression_ratio == 0 {
            return Err(ConfigError::InvalidCompressionRatio);
        }
        if self.audio.files.is_empty() {
            return Err(ConfigError::MissingAudio);
        }
        if self.transport.kind == TransportKind::Nats && self.transport.token.is_none() {
            return Err(ConfigError::MissingCredential);
        }
        if self.run.loop_count == 0 && self.run.duration_secs == Some(0) {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(())
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            compression_ratio: self.audio.compression_ratio,
            ..AudioFormat::new(self.audio.encoding, self.audio.sample_rate)
        }
    }

    /// Wall-clock limit; always set when no loop count bounds the run
    pub fn run_duration(&self) -> Option<Duration> {
        match (self.run.loop_count, self.run.duration_secs) {
            (0, secs) => Some(Duration::from_secs(secs.unwrap_or(DEFAULT_DURATION_SECS))),
            (_, secs) => secs.map(Duration::from_secs),
        }
    }

    fn max_sentence_silence(&self) -> Option<u32> {
        let silence = self.recognition.max_sentence_silence_ms?;
        if SENTENCE_SILENCE_RANGE_MS.contains(&silence) {
            Some(silence)
        } else {
            warn!(
                "Ignoring max sentence silence of {}ms (expected {}..={})",
                silence,
                SENTENCE_SILENCE_RANGE_MS.start(),
                SENTENCE_SILENCE_RANGE_MS.end()
            );
            None
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let format = self.audio_format();
        SessionConfig {
            start: StartParams {
                format,
                max_sentence_silence_ms: self.max_sentence_silence(),
                intermediate_results: self.recognition.intermediate_results,
                punctuation: self.recognition.punctuation,
                inverse_text_normalization: self.recognition.inverse_text_normalization,
                token: String::new(),
            },
            connection_mode: self.run.connection_mode,
            frame_bytes: self
                .audio
                .frame_bytes
                .unwrap_or_else(|| format.default_frame_bytes()),
            pacing: self.run.pacing,
            start_timeout: Duration::from_millis(self.timeouts.start_ms),
            stop_timeout: Duration::from_millis(self.timeouts.stop_ms),
            release_grace: Duration::from_millis(self.timeouts.release_grace_ms),
            loop_count: self.run.loop_count,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            concurrency: self.run.concurrency,
            session: self.session_config(),
            duration: self.run_duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Config {
        let mut config = Config::default();
        config.audio.files = vec!["a.wav".to_string()];
        config.transport.token = Some("token".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = valid();
        assert!(config.validate().is_ok());

        let session = config.session_config();
        assert_eq!(session.frame_bytes, 3200);
        assert_eq!(session.start_timeout, Duration::from_secs(5));
        assert_eq!(session.release_grace, Duration::from_secs(10));
        assert_eq!(config.run_duration(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = valid();
        config.run.concurrency = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoConcurrency));

        let mut config = valid();
        config.audio.sample_rate = 44100;
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedSampleRate(44100)));

        let mut config = valid();
        config.transport.token = None;
        assert_eq!(config.validate(), Err(ConfigError::MissingCredential));
        config.transport.kind = TransportKind::Simulated;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_silence_is_ignored() {
        let mut config = valid();
        config.recognition.max_sentence_silence_ms = Some(100);
        assert_eq!(config.session_config().start.max_sentence_silence_ms, None);

        config.recognition.max_sentence_silence_ms = Some(800);
        assert_eq!(config.session_config().start.max_sentence_silence_ms, Some(800));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[run]\nconcurrency = 8\nloop_count = 3\nconnection_mode = \"long-lived\"\n\n[audio]\nencoding = \"opus\"\nfiles = [\"x.opus\"]"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.run.concurrency, 8);
        assert_eq!(config.run.connection_mode, ConnectionMode::LongLived);
        assert_eq!(config.audio.encoding, AudioEncoding::Opus);
        assert_eq!(config.session_config().frame_bytes, 640);
        assert_eq!(config.run_duration(), None);
        assert!(config.recognition.punctuation);
    }
}
