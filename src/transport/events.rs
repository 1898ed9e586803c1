use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Delivery path from a transport to the dispatcher
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a connected sink/stream pair
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// Asynchronous notice from the recognition service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportEvent {
    pub session_id: String,
    pub status_code: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl TransportEvent {
    pub fn new(session_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            session_id: session_id.into(),
            status_code: kind.default_status(),
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn with_status(mut self, status_code: i32) -> Self {
        self.status_code = status_code;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Started,
    SentenceBegin {
        index: u32,
        time_ms: u64,
    },
    SentenceEnd {
        index: u32,
        text: String,
        begin_time_ms: u64,
        end_time_ms: u64,
        confidence: f32,
    },
    ResultChanged {
        text: String,
        time_ms: u64,
    },
    Completed,
    TaskFailed {
        error_message: String,
    },
    Closed,
}

/// Status code reported by the service for successful notices
pub const STATUS_OK: i32 = 20_000_000;

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::SentenceBegin { .. } => "sentence_begin",
            EventKind::SentenceEnd { .. } => "sentence_end",
            EventKind::ResultChanged { .. } => "result_changed",
            EventKind::Completed => "completed",
            EventKind::TaskFailed { .. } => "task_failed",
            EventKind::Closed => "closed",
        }
    }

    fn default_status(&self) -> i32 {
        match self {
            EventKind::TaskFailed { .. } => 40_000_000,
            _ => STATUS_OK,
        }
    }
}
