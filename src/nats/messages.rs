use crate::transport::{EventKind, StartParams, TransportEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recognition request published on `asr.control.start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMessage {
    pub session_id: String,
    pub format: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sentence_silence: Option<u32>,
    pub enable_intermediate_result: bool,
    pub enable_punctuation_prediction: bool,
    pub enable_inverse_text_normalization: bool,
    pub token: String,
    pub timestamp: String, // RFC3339 timestamp
}

impl StartMessage {
    pub fn new(session_id: &str, params: &StartParams) -> Self {
        Self {
            session_id: session_id.to_string(),
            format: params.format.encoding.as_str().to_string(),
            sample_rate: params.format.sample_rate,
            max_sentence_silence: params.max_sentence_silence_ms,
            enable_intermediate_result: params.intermediate_results,
            enable_punctuation_prediction: params.punctuation,
            enable_inverse_text_normalization: params.inverse_text_normalization,
            token: params.token.clone(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Stop,
    Cancel,
}

impl ControlAction {
    pub fn subject(&self) -> &'static str {
        match self {
            ControlAction::Stop => "asr.control.stop",
            ControlAction::Cancel => "asr.control.cancel",
        }
    }
}

/// Stop/cancel request for a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub session_id: String,
    pub action: ControlAction,
    pub timestamp: String,
}

impl ControlMessage {
    pub fn new(session_id: &str, action: ControlAction) -> Self {
        Self {
            session_id: session_id.to_string(),
            action,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Audio frame published on `asr.audio.<session>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub sequence: u32,
    pub encoding: String,
    pub audio: String, // Base64-encoded frame bytes
    pub timestamp: String,
}

/// Notice received on `asr.event.<session>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub session_id: String,
    pub status_code: i32,
    pub timestamp: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EventMessage {
    /// Convert to a dispatcher event; an unparsable timestamp becomes now
    pub fn into_event(self) -> TransportEvent {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        TransportEvent {
            session_id: self.session_id,
            status_code: self.status_code,
            timestamp,
            kind: self.kind,
        }
    }
}
