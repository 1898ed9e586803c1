//! Per-session state shared between a coordinator and the event dispatcher
//!
//! Both sides mutate the state through the same lock. Waiters subscribe to
//! `watch` channels; a late or repeated signal only replaces the current value.

use super::phase::{Phase, SessionId};
use crate::telemetry::FailureRecord;
use crate::transport::{EventKind, TransportEvent};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

/// When each lifecycle milestone was reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseInstants {
    pub requested: Option<Instant>,
    pub acknowledged_start: Option<Instant>,
    pub first_audio: Option<Instant>,
    pub first_result: Option<Instant>,
    pub completed: Option<Instant>,
    pub closed: Option<Instant>,
    pub failed: Option<Instant>,
}

/// A finished sentence reported by the service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceRecord {
    pub index: u32,
    pub text: String,
    pub begin_time_ms: u64,
    pub end_time_ms: u64,
    pub confidence: f32,
    #[serde(skip)]
    pub received_at: Instant,
}

/// Effect of one event on a session; the dispatcher turns these into
/// telemetry updates after the session lock is released
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Event did not apply to the current phase
    Ignored,
    StartAcknowledged { latency_ms: u64 },
    FirstResult { latency_ms: u64 },
    /// Accepted, nothing to record
    Progress,
    SentenceRecorded,
    Completed { latency_ms: u64 },
    Closed { latency_ms: u64 },
    Failed { record: FailureRecord },
    /// Final notice after a terminal phase; deferred release may proceed
    Quiesced,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    instants: PhaseInstants,
    sentences: Vec<SentenceRecord>,
    completed_seen: bool,
    quiesced: bool,
}

pub struct SessionHandle {
    id: SessionId,
    state: Mutex<SessionState>,
    phase_tx: watch::Sender<Phase>,
    quiesced_tx: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(id: SessionId) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Idle);
        let (quiesced_tx, _) = watch::channel(false);
        Self {
            id,
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                instants: PhaseInstants::default(),
                sentences: Vec::new(),
                completed_seen: false,
                quiesced: false,
            }),
            phase_tx,
            quiesced_tx,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next` if the current phase satisfies `allowed`.
    ///
    /// Waiters are not woken here; see [`SessionHandle::publish`].
    fn advance(&self, state: &mut SessionState, allowed: impl Fn(Phase) -> bool, next: Phase) -> bool {
        if !allowed(state.phase) {
            return false;
        }
        debug!("{}: {} -> {}", self.id, state.phase, next);
        state.phase = next;
        true
    }

    /// Advance and wake waiters right away
    fn advance_now(&self, state: &mut SessionState, allowed: impl Fn(Phase) -> bool, next: Phase) -> bool {
        let advanced = self.advance(state, allowed, next);
        if advanced {
            self.phase_tx.send_replace(next);
        }
        advanced
    }

    fn mark_quiesced(state: &mut SessionState) -> bool {
        if state.quiesced {
            return false;
        }
        state.quiesced = true;
        true
    }

    /// Wake waiters with the current phase and quiesce flag.
    ///
    /// The dispatcher calls this once an event's telemetry is recorded, so a
    /// coordinator never observes a transition before its counters.
    pub fn publish(&self) {
        // Sent under the session lock so the channel never goes back to an
        // older phase
        let state = self.lock();
        let phase = state.phase;
        self.phase_tx.send_if_modified(|current| {
            let changed = *current != phase;
            *current = phase;
            changed
        });
        if state.quiesced {
            self.quiesced_tx.send_replace(true);
        }
    }

    fn latency_ms(state: &SessionState, at: Instant) -> u64 {
        state
            .instants
            .requested
            .map(|requested| at.saturating_duration_since(requested).as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn instants(&self) -> PhaseInstants {
        self.lock().instants
    }

    pub fn sentences(&self) -> Vec<SentenceRecord> {
        self.lock().sentences.clone()
    }

    /// `Idle → Starting`; stamps the instant every latency is measured from
    pub fn begin_start(&self) -> bool {
        let mut state = self.lock();
        let advanced = self.advance_now(&mut state, |p| p == Phase::Idle, Phase::Starting);
        if advanced {
            state.instants.requested = Some(Instant::now());
        }
        advanced
    }

    /// `Starting → Failed` after `start` itself returned an error
    pub fn reject_start(&self) -> bool {
        let mut state = self.lock();
        let advanced = self.advance_now(&mut state, |p| p == Phase::Starting, Phase::Failed);
        if advanced {
            state.instants.failed = Some(Instant::now());
        }
        advanced
    }

    /// `Starting → Cancelled` once the acknowledgment wait timed out.
    ///
    /// Returns `false` if an event settled the phase first.
    pub fn cancel_start(&self) -> bool {
        let mut state = self.lock();
        self.advance_now(&mut state, |p| p == Phase::Starting, Phase::Cancelled)
    }

    /// `Started → Streaming`
    pub fn begin_streaming(&self) -> bool {
        let mut state = self.lock();
        let advanced = self.advance_now(&mut state, |p| p == Phase::Started, Phase::Streaming);
        if advanced {
            state.instants.first_audio = Some(Instant::now());
        }
        advanced
    }

    /// Checked before every frame
    pub fn is_streaming(&self) -> bool {
        self.lock().phase == Phase::Streaming
    }

    /// `Started | Streaming → Stopping`
    pub fn begin_stop(&self) -> bool {
        let mut state = self.lock();
        self.advance_now(
            &mut state,
            |p| matches!(p, Phase::Started | Phase::Streaming),
            Phase::Stopping,
        )
    }

    /// Give up on a session still in `Stopping`.
    ///
    /// The session becomes `Closed` if the service already reported
    /// `Completed`, `Failed` otherwise; later notices are no-ops either way.
    /// Returns whether `Completed` was seen, or `None` if the session had
    /// already reached a terminal phase.
    pub fn abandon_stop(&self) -> Option<bool> {
        let mut state = self.lock();
        let completed_seen = state.completed_seen;
        let next = if completed_seen { Phase::Closed } else { Phase::Failed };
        if self.advance_now(&mut state, |p| p == Phase::Stopping, next) {
            Some(completed_seen)
        } else {
            None
        }
    }

    /// Wait until the phase satisfies `done`, at most `timeout`.
    ///
    /// Returns the phase that ended the wait, `None` on timeout.
    pub async fn wait_until(&self, done: impl Fn(Phase) -> bool, timeout: Duration) -> Option<Phase> {
        let mut rx = self.phase_tx.subscribe();
        let phase = match tokio::time::timeout(timeout, rx.wait_for(|phase| done(*phase))).await {
            Ok(Ok(phase)) => Some(*phase),
            _ => None,
        };
        phase
    }

    /// Wait for the final notice after a terminal phase, at most `grace`
    pub async fn wait_quiesced(&self, grace: Duration) -> bool {
        let mut rx = self.quiesced_tx.subscribe();
        let quiesced = matches!(tokio::time::timeout(grace, rx.wait_for(|q| *q)).await, Ok(Ok(_)));
        quiesced
    }

    /// Apply one event under the session lock; waiters see the result after
    /// [`SessionHandle::publish`]
    pub fn apply(&self, event: &TransportEvent) -> Transition {
        let mut state = self.lock();
        let now = Instant::now();
        let phase = state.phase;

        match &event.kind {
            EventKind::Started => {
                if !self.advance(&mut state, |p| p == Phase::Starting, Phase::Started) {
                    return Transition::Ignored;
                }
                state.instants.acknowledged_start = Some(now);
                Transition::StartAcknowledged {
                    latency_ms: Self::latency_ms(&state, now),
                }
            }
            EventKind::SentenceBegin { .. } if phase.is_active() => Transition::Progress,
            EventKind::ResultChanged { .. } if phase.is_active() => {
                if state.instants.first_result.is_some() {
                    return Transition::Progress;
                }
                state.instants.first_result = Some(now);
                Transition::FirstResult {
                    latency_ms: Self::latency_ms(&state, now),
                }
            }
            EventKind::SentenceEnd {
                index,
                text,
                begin_time_ms,
                end_time_ms,
                confidence,
            } if phase.is_active() => {
                state.sentences.push(SentenceRecord {
                    index: *index,
                    text: text.clone(),
                    begin_time_ms: *begin_time_ms,
                    end_time_ms: *end_time_ms,
                    confidence: *confidence,
                    received_at: now,
                });
                Transition::SentenceRecorded
            }
            EventKind::Completed if phase.is_active() && !state.completed_seen => {
                state.completed_seen = true;
                state.instants.completed = Some(now);
                Transition::Completed {
                    latency_ms: Self::latency_ms(&state, now),
                }
            }
            // A close before `stop` was requested does not finish the session
            EventKind::Closed if phase == Phase::Stopping => {
                self.advance(&mut state, |p| p == Phase::Stopping, Phase::Closed);
                state.instants.closed = Some(now);
                Self::mark_quiesced(&mut state);
                Transition::Closed {
                    latency_ms: Self::latency_ms(&state, now),
                }
            }
            EventKind::TaskFailed { error_message } if !phase.is_terminal() => {
                self.advance(&mut state, |p| !p.is_terminal(), Phase::Failed);
                state.instants.failed = Some(now);
                Transition::Failed {
                    record: FailureRecord::new(event.status_code, self.id.as_str(), error_message.clone()),
                }
            }
            EventKind::Closed | EventKind::TaskFailed { .. } if phase.is_terminal() => {
                if Self::mark_quiesced(&mut state) {
                    Transition::Quiesced
                } else {
                    Transition::Ignored
                }
            }
            _ => Transition::Ignored,
        }
    }

    /// Per-session timing and sentence summary, logged at debug level
    pub fn log_sentences(&self) {
        let state = self.lock();
        let since_request = |at: Option<Instant>| at.map(|at| Self::latency_ms(&state, at));

        debug!(
            "{}: start->started {:?}ms, start->first audio {:?}ms, {} sentence(s)",
            self.id,
            since_request(state.instants.acknowledged_start),
            since_request(state.instants.first_audio),
            state.sentences.len()
        );
        for sentence in &state.sentences {
            debug!(
                "{}: sentence {} [{}ms..{}ms] ({}ms, confidence {:.2}): {}",
                self.id,
                sentence.index,
                sentence.begin_time_ms,
                sentence.end_time_ms,
                sentence.end_time_ms.saturating_sub(sentence.begin_time_ms),
                sentence.confidence,
                sentence.text
            );
        }
    }
}
