use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position of a session in its lifecycle.
///
/// `Idle → Starting → Started → Streaming → Stopping → {Closed | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Starting,
    Started,
    Streaming,
    Stopping,
    Closed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed | Phase::Cancelled)
    }

    /// Started and not yet terminal: results and closing notices apply
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Started | Phase::Streaming | Phase::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Started => "started",
            Phase::Streaming => "streaming",
            Phase::Stopping => "stopping",
            Phase::Closed => "closed",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one lifecycle iteration of one worker.
///
/// Unique for the process lifetime, so late events for an earlier
/// iteration can never be mistaken for the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId {
    pub worker: usize,
    pub iteration: u32,
    key: String,
}

impl SessionId {
    pub fn new(worker: usize, iteration: u32) -> Self {
        let nonce = Uuid::new_v4().simple().to_string();
        Self {
            worker,
            iteration,
            key: format!("w{:03}-i{:04}-{}", worker, iteration, &nonce[..12]),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
