use serde::{Deserialize, Serialize};
use std::fmt;

/// Latency phases measured from the session's initial `start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyPhase {
    /// `start` → `Started`
    StartAck,
    /// `start` → first `ResultChanged`
    FirstResult,
    /// `start` → `Completed`
    Completion,
    /// `start` → `Closed`
    Close,
}

impl LatencyPhase {
    pub const ALL: [LatencyPhase; 4] = [
        LatencyPhase::StartAck,
        LatencyPhase::FirstResult,
        LatencyPhase::Completion,
        LatencyPhase::Close,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LatencyPhase::StartAck => "started",
            LatencyPhase::FirstResult => "first result",
            LatencyPhase::Completion => "completed",
            LatencyPhase::Close => "closed",
        }
    }
}

impl fmt::Display for LatencyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Running count/total/min/max for one latency phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub count: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PhaseStats {
    pub fn record(&mut self, latency_ms: u64) {
        if self.count == 0 {
            self.min_ms = latency_ms;
            self.max_ms = latency_ms;
        } else {
            self.min_ms = self.min_ms.min(latency_ms);
            self.max_ms = self.max_ms.max(latency_ms);
        }
        self.count += 1;
        self.total_ms += latency_ms;
    }

    /// Mean latency; always within `[min_ms, max_ms]`
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

/// Global counters; each is bumped at most once per session per transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// Lifecycle iterations that called `start`
    Requested,
    /// `Started` acknowledgments honored
    Started,
    /// Iterations that ended cleanly
    CompletedSuccessfully,
    /// Start acknowledgment timed out
    Cancelled,
    /// `start` rejected synchronously
    StartFailed,
    /// Asynchronous task failure
    TaskFailed,
    /// `Closed` notices honored
    Closed,
    /// No closing notice before the stop timeout
    StopTimedOut,
    /// Transport could not create the request
    CreateFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub requested: u64,
    pub started: u64,
    pub completed_successfully: u64,
    pub cancelled: u64,
    pub start_failed: u64,
    pub task_failed: u64,
    pub closed: u64,
    pub stop_timed_out: u64,
    pub create_failed: u64,
}

impl Counters {
    fn slot(&mut self, counter: Counter) -> &mut u64 {
        match counter {
            Counter::Requested => &mut self.requested,
            Counter::Started => &mut self.started,
            Counter::CompletedSuccessfully => &mut self.completed_successfully,
            Counter::Cancelled => &mut self.cancelled,
            Counter::StartFailed => &mut self.start_failed,
            Counter::TaskFailed => &mut self.task_failed,
            Counter::Closed => &mut self.closed,
            Counter::StopTimedOut => &mut self.stop_timed_out,
            Counter::CreateFailed => &mut self.create_failed,
        }
    }

    pub fn increment(&mut self, counter: Counter) {
        *self.slot(counter) += 1;
    }

    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Requested => self.requested,
            Counter::Started => self.started,
            Counter::CompletedSuccessfully => self.completed_successfully,
            Counter::Cancelled => self.cancelled,
            Counter::StartFailed => self.start_failed,
            Counter::TaskFailed => self.task_failed,
            Counter::Closed => self.closed,
            Counter::StopTimedOut => self.stop_timed_out,
            Counter::CreateFailed => self.create_failed,
        }
    }

    /// Iterations that reached an outcome; equals `requested` once every
    /// iteration has finished
    pub fn resolved(&self) -> u64 {
        self.cancelled + self.start_failed + self.completed_successfully + self.task_failed + self.stop_timed_out
    }
}

/// Start-ack latency distribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartHistogram {
    pub le_50ms: u64,
    pub le_100ms: u64,
    pub le_200ms: u64,
    pub le_500ms: u64,
    pub le_1000ms: u64,
    pub over_1000ms: u64,
}

impl StartHistogram {
    pub fn record(&mut self, latency_ms: u64) {
        let bucket = match latency_ms {
            0..=50 => &mut self.le_50ms,
            51..=100 => &mut self.le_100ms,
            101..=200 => &mut self.le_200ms,
            201..=500 => &mut self.le_500ms,
            501..=1000 => &mut self.le_1000ms,
            _ => &mut self.over_1000ms,
        };
        *bucket += 1;
    }

    pub fn total(&self) -> u64 {
        self.le_50ms + self.le_100ms + self.le_200ms + self.le_500ms + self.le_1000ms + self.over_1000ms
    }
}

/// Wall time spent inside `send_frame` calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendStats {
    pub frames: u64,
    pub total_us: u64,
}

impl SendStats {
    pub fn average_us(&self) -> u64 {
        if self.frames == 0 {
            0
        } else {
            self.total_us / self.frames
        }
    }
}

/// Audio duration fed per lifecycle iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStats {
    pub iterations: u64,
    pub total_ms: u64,
}

impl AudioStats {
    pub fn average_ms(&self) -> u64 {
        if self.iterations == 0 {
            0
        } else {
            self.total_ms / self.iterations
        }
    }
}
