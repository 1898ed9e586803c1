use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::stats::{AudioStats, Counter, Counters, LatencyPhase, PhaseStats, SendStats, StartHistogram};
use crate::session::SessionId;

#[derive(Debug, Default)]
struct TelemetryState {
    phases: BTreeMap<LatencyPhase, PhaseStats>,
    workers: BTreeMap<usize, BTreeMap<LatencyPhase, PhaseStats>>,
    counters: Counters,
    start_histogram: StartHistogram,
    send: SendStats,
    audio: AudioStats,
}

/// Cross-session latency statistics and counters.
///
/// Every mutation goes through one aggregator-wide lock.
#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    state: Mutex<TelemetryState>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a latency sample (ms since the session's `start` call)
    pub fn record(&self, session: &SessionId, phase: LatencyPhase, latency_ms: u64) {
        debug!("{}: {} after {}ms", session, phase, latency_ms);

        let mut state = self.lock();
        state.phases.entry(phase).or_default().record(latency_ms);
        state
            .workers
            .entry(session.worker)
            .or_default()
            .entry(phase)
            .or_default()
            .record(latency_ms);
        if phase == LatencyPhase::StartAck {
            state.start_histogram.record(latency_ms);
        }
    }

    pub fn increment(&self, counter: Counter) {
        self.lock().counters.increment(counter);
    }

    /// Accumulate `send_frame` timing for one streaming pass
    pub fn record_send(&self, frames: u64, total_us: u64) {
        let mut state = self.lock();
        state.send.frames += frames;
        state.send.total_us += total_us;
    }

    /// Accumulate the audio duration fed by one iteration
    pub fn record_audio(&self, duration_ms: u64) {
        let mut state = self.lock();
        state.audio.iterations += 1;
        state.audio.total_ms += duration_ms;
    }

    /// Copy of everything recorded so far.
    ///
    /// Consistent as of the lock release; fields updated concurrently by
    /// different sessions are not ordered relative to each other.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.lock();
        TelemetrySnapshot {
            phases: state.phases.clone(),
            workers: state.workers.clone(),
            counters: state.counters,
            start_histogram: state.start_histogram,
            send: state.send,
            audio: state.audio,
        }
    }

    /// Clear everything; only valid between independent runs
    pub fn reset(&self) {
        *self.lock() = TelemetryState::default();
    }
}

/// Immutable copy of the aggregator's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub phases: BTreeMap<LatencyPhase, PhaseStats>,
    pub workers: BTreeMap<usize, BTreeMap<LatencyPhase, PhaseStats>>,
    pub counters: Counters,
    pub start_histogram: StartHistogram,
    pub send: SendStats,
    pub audio: AudioStats,
}

impl TelemetrySnapshot {
    pub fn phase(&self, phase: LatencyPhase) -> PhaseStats {
        self.phases.get(&phase).copied().unwrap_or_default()
    }

    pub fn worker_phase(&self, worker: usize, phase: LatencyPhase) -> PhaseStats {
        self.workers
            .get(&worker)
            .and_then(|phases| phases.get(&phase))
            .copied()
            .unwrap_or_default()
    }
}
