//! Routes transport events to the owning session
//!
//! The session lock is held only while the event is applied. Telemetry and
//! the failure log are updated afterwards, from the returned [`Transition`].

use crate::session::{Phase, SessionHandle, Transition};
use crate::telemetry::{Counter, FailureLog, LatencyPhase, TelemetryAggregator};
use crate::transport::{EventStream, TransportEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

/// Live session as shown by the status API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub worker: usize,
    pub iteration: u32,
    pub phase: Phase,
}

pub struct EventDispatcher {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    telemetry: Arc<TelemetryAggregator>,
    failure_log: Arc<FailureLog>,
}

impl EventDispatcher {
    pub fn new(telemetry: Arc<TelemetryAggregator>, failure_log: Arc<FailureLog>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            telemetry,
            failure_log,
        }
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    /// Make a session reachable for its events; must precede `start`
    pub fn register(&self, session: Arc<SessionHandle>) {
        let key = session.id().as_str().to_string();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, session);
    }

    /// Drop the routing entry; later events for the id are discarded
    pub fn unregister(&self, session_id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }

    pub fn live_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .map(|session| SessionSummary {
                session_id: session.id().as_str().to_string(),
                worker: session.id().worker,
                iteration: session.id().iteration,
                phase: session.phase(),
            })
            .collect();
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }

    /// Route one event and apply its telemetry side effects
    pub fn dispatch(&self, event: &TransportEvent) -> Transition {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.session_id)
            .cloned();

        let Some(session) = session else {
            debug!("Discarding {} for unknown session {}", event.kind.name(), event.session_id);
            return Transition::Ignored;
        };

        let transition = session.apply(event);
        let id = session.id();

        match &transition {
            Transition::StartAcknowledged { latency_ms } => {
                self.telemetry.record(id, LatencyPhase::StartAck, *latency_ms);
                self.telemetry.increment(Counter::Started);
            }
            Transition::FirstResult { latency_ms } => {
                self.telemetry.record(id, LatencyPhase::FirstResult, *latency_ms);
            }
            Transition::Completed { latency_ms } => {
                self.telemetry.record(id, LatencyPhase::Completion, *latency_ms);
            }
            Transition::Closed { latency_ms } => {
                self.telemetry.record(id, LatencyPhase::Close, *latency_ms);
                self.telemetry.increment(Counter::Closed);
                self.telemetry.increment(Counter::CompletedSuccessfully);
                info!("{}: closed after {}ms", id, latency_ms);
            }
            Transition::Failed { record } => {
                self.telemetry.increment(Counter::TaskFailed);
                if let Err(e) = self.failure_log.append(record) {
                    error!("{}: {:#}", id, e);
                }
            }
            Transition::Ignored => {
                debug!("{}: ignored {} in phase {}", id, event.kind.name(), session.phase());
            }
            Transition::Progress | Transition::SentenceRecorded | Transition::Quiesced => {}
        }

        session.publish();
        transition
    }

    /// Consume a transport's event stream until every sender is gone
    pub async fn run(self: Arc<Self>, mut events: EventStream) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
        debug!("Event stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use crate::transport::EventKind;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir) -> EventDispatcher {
        EventDispatcher::new(
            Arc::new(TelemetryAggregator::new()),
            Arc::new(FailureLog::new(dir.path().join("failures.log"))),
        )
    }

    #[test]
    fn test_unknown_session_is_ignored() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);
        let event = TransportEvent::new("nobody", EventKind::Started);
        assert_eq!(dispatcher.dispatch(&event), Transition::Ignored);
        assert_eq!(dispatcher.telemetry().snapshot().counters.started, 0);
    }

    #[test]
    fn test_duplicate_events_count_once() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);
        let session = Arc::new(SessionHandle::new(SessionId::new(1, 1)));
        dispatcher.register(Arc::clone(&session));
        session.begin_start();

        let key = session.id().as_str().to_string();
        for kind in [EventKind::Started, EventKind::Started] {
            dispatcher.dispatch(&TransportEvent::new(key.clone(), kind));
        }
        assert!(session.begin_streaming());
        assert!(session.begin_stop());
        for kind in [EventKind::Closed, EventKind::Closed] {
            dispatcher.dispatch(&TransportEvent::new(key.clone(), kind));
        }

        let snapshot = dispatcher.telemetry().snapshot();
        assert_eq!(snapshot.counters.started, 1);
        assert_eq!(snapshot.counters.closed, 1);
        assert_eq!(snapshot.counters.completed_successfully, 1);
        assert_eq!(snapshot.phase(LatencyPhase::Close).count, 1);
        assert_eq!(dispatcher.live_sessions()[0].phase, Phase::Closed);

        dispatcher.unregister(&key);
        assert!(dispatcher.live_sessions().is_empty());
    }

    #[test]
    fn test_early_close_counts_nothing() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);
        let session = Arc::new(SessionHandle::new(SessionId::new(1, 1)));
        dispatcher.register(Arc::clone(&session));
        session.begin_start();

        let key = session.id().as_str().to_string();
        dispatcher.dispatch(&TransportEvent::new(key.clone(), EventKind::Started));
        assert!(session.begin_streaming());

        let transition = dispatcher.dispatch(&TransportEvent::new(key, EventKind::Closed));
        assert_eq!(transition, Transition::Ignored);
        assert_eq!(session.phase(), Phase::Streaming);

        let counters = dispatcher.telemetry().snapshot().counters;
        assert_eq!(counters.closed, 0);
        assert_eq!(counters.completed_successfully, 0);
    }
}
