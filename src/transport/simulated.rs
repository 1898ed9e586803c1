//! In-process recognition service double
//!
//! Behaves like the real client: calls return immediately and every notice
//! is delivered later from a background task, in order, per connection.

use super::{ConnectionMode, EventKind, EventSink, StartParams, Transport, TransportEvent, TransportHandle};
use crate::audio::AudioEncoding;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// How the simulated service reacts to each call
#[derive(Debug, Clone)]
pub struct SimulationProfile {
    /// `create` fails outright
    pub fail_create: bool,
    /// `start` is rejected synchronously
    pub reject_start: bool,
    /// Delay before `Started`; `None` never acknowledges
    pub start_ack_delay: Option<Duration>,
    /// 1-based send call that returns a terminal error
    pub fail_send_at: Option<usize>,
    /// Emit `TaskFailed` once this many frames were accepted
    pub task_failure_after_frames: Option<usize>,
    /// Deliver `Closed` right after a `TaskFailed`
    pub close_after_failure: bool,
    /// Emit `ResultChanged` every N accepted frames (0 disables)
    pub result_every_frames: usize,
    /// Frames per sentence for `SentenceBegin`/`SentenceEnd` (0 disables)
    pub sentence_every_frames: usize,
    /// Delay between `stop` and `Completed`; `None` never closes
    pub stop_ack_delay: Option<Duration>,
    /// Delay between `Completed` and `Closed`
    pub close_delay: Duration,
    /// `cancel` suppresses queued events
    pub honor_cancel: bool,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            fail_create: false,
            reject_start: false,
            start_ack_delay: Some(Duration::from_millis(30)),
            fail_send_at: None,
            task_failure_after_frames: None,
            close_after_failure: true,
            result_every_frames: 2,
            sentence_every_frames: 10,
            stop_ack_delay: Some(Duration::from_millis(30)),
            close_delay: Duration::from_millis(5),
            honor_cancel: true,
        }
    }
}

/// Call counters for assertions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    pub creates: usize,
    pub starts: usize,
    pub frames_accepted: usize,
    pub stops: usize,
    pub cancels: usize,
    /// Sessions handed back through `finish`
    pub finishes: usize,
    pub releases: usize,
}

struct QueuedEvent {
    delay: Duration,
    event: TransportEvent,
    suppressed: Arc<AtomicBool>,
}

/// One recognition request bound to a connection
struct Binding {
    session_id: String,
    frames: usize,
    failed: bool,
    suppressed: Arc<AtomicBool>,
}

struct Connection {
    queue: mpsc::UnboundedSender<QueuedEvent>,
    binding: Option<Binding>,
}

pub struct SimulatedTransport {
    profile: SimulationProfile,
    sink: EventSink,
    connections: Mutex<HashMap<u64, Connection>>,
    next_id: AtomicU64,
    creates: AtomicUsize,
    starts: AtomicUsize,
    frames_accepted: AtomicUsize,
    stops: AtomicUsize,
    cancels: AtomicUsize,
    finishes: AtomicUsize,
    releases: AtomicUsize,
}

impl SimulatedTransport {
    pub fn new(profile: SimulationProfile, sink: EventSink) -> Self {
        Self {
            profile,
            sink,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            creates: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            frames_accepted: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            finishes: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> SimulationStats {
        SimulationStats {
            creates: self.creates.load(Ordering::SeqCst),
            starts: self.starts.load(Ordering::SeqCst),
            frames_accepted: self.frames_accepted.load(Ordering::SeqCst),
            stops: self.stops.load(Ordering::SeqCst),
            cancels: self.cancels.load(Ordering::SeqCst),
            finishes: self.finishes.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
        }
    }

    /// Handles created and not yet released
    pub fn open_connections(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connections still bound to a recognition request
    pub fn bound_connections(&self) -> usize {
        self.lock().values().filter(|c| c.binding.is_some()).count()
    }

    /// Per-connection delivery task; keeps events in the order they were queued
    fn spawn_delivery(sink: EventSink) -> mpsc::UnboundedSender<QueuedEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedEvent>();

        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                if !queued.delay.is_zero() {
                    tokio::time::sleep(queued.delay).await;
                }
                if queued.suppressed.load(Ordering::SeqCst) {
                    debug!(
                        "Suppressed {} for {}",
                        queued.event.kind.name(),
                        queued.event.session_id
                    );
                    continue;
                }
                if sink.send(queued.event).is_err() {
                    break;
                }
            }
        });

        tx
    }

    fn enqueue(connection: &Connection, delay: Duration, kind: EventKind) {
        if let Some(binding) = &connection.binding {
            let _ = connection.queue.send(QueuedEvent {
                delay,
                event: TransportEvent::new(binding.session_id.clone(), kind),
                suppressed: Arc::clone(&binding.suppressed),
            });
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn create(&self, session_id: &str, mode: ConnectionMode) -> TransportResult<TransportHandle> {
        if self.profile.fail_create {
            return Err(TransportError::Create(format!("simulated failure for {}", session_id)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let connection = Connection {
            queue: Self::spawn_delivery(self.sink.clone()),
            binding: None,
        };
        self.lock().insert(id, connection);
        self.creates.fetch_add(1, Ordering::SeqCst);

        Ok(TransportHandle { id, mode })
    }

    async fn start(&self, handle: &TransportHandle, session_id: &str, _params: &StartParams) -> TransportResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.profile.reject_start {
            return Err(TransportError::Rejected("simulated start rejection".to_string()));
        }

        let mut connections = self.lock();
        let connection = connections
            .get_mut(&handle.id)
            .ok_or(TransportError::UnknownHandle(handle.id))?;

        connection.binding = Some(Binding {
            session_id: session_id.to_string(),
            frames: 0,
            failed: false,
            suppressed: Arc::new(AtomicBool::new(false)),
        });

        if let Some(delay) = self.profile.start_ack_delay {
            Self::enqueue(connection, delay, EventKind::Started);
        }

        Ok(())
    }

    async fn send_frame(&self, handle: &TransportHandle, frame: &[u8], _encoding: AudioEncoding) -> TransportResult<usize> {
        let mut connections = self.lock();
        let connection = connections
            .get_mut(&handle.id)
            .ok_or(TransportError::UnknownHandle(handle.id))?;

        let (calls, failed) = match connection.binding.as_mut() {
            Some(binding) => {
                binding.frames += 1;
                (binding.frames, binding.failed)
            }
            None => return Err(TransportError::Closed),
        };

        if failed {
            return Err(TransportError::Closed);
        }
        if self.profile.fail_send_at == Some(calls) {
            return Err(TransportError::SendFailed(format!("simulated failure on call {}", calls)));
        }

        self.frames_accepted.fetch_add(1, Ordering::SeqCst);
        let audio_ms = (calls * frame.len() / 32) as u64;

        let every = self.profile.sentence_every_frames;
        if every > 0 && calls % every == 1 % every {
            let index = (calls / every + 1) as u32;
            Self::enqueue(connection, Duration::ZERO, EventKind::SentenceBegin { index, time_ms: audio_ms });
        }
        if self.profile.result_every_frames > 0 && calls % self.profile.result_every_frames == 0 {
            Self::enqueue(
                connection,
                Duration::ZERO,
                EventKind::ResultChanged {
                    text: format!("partial result {}", calls),
                    time_ms: audio_ms,
                },
            );
        }
        if every > 0 && calls % every == 0 {
            let index = (calls / every) as u32;
            Self::enqueue(
                connection,
                Duration::ZERO,
                EventKind::SentenceEnd {
                    index,
                    text: format!("sentence {}", index),
                    begin_time_ms: audio_ms.saturating_sub((every * frame.len() / 32) as u64),
                    end_time_ms: audio_ms,
                    confidence: 0.9,
                },
            );
        }

        if self.profile.task_failure_after_frames == Some(calls) {
            if let Some(binding) = connection.binding.as_mut() {
                binding.failed = true;
            }
            Self::enqueue(
                connection,
                Duration::ZERO,
                EventKind::TaskFailed {
                    error_message: "simulated task failure".to_string(),
                },
            );
            if self.profile.close_after_failure {
                Self::enqueue(connection, Duration::ZERO, EventKind::Closed);
            }
        }

        Ok(0)
    }

    async fn stop(&self, handle: &TransportHandle) -> TransportResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);

        let connections = self.lock();
        let connection = connections
            .get(&handle.id)
            .ok_or(TransportError::UnknownHandle(handle.id))?;

        if let Some(delay) = self.profile.stop_ack_delay {
            Self::enqueue(connection, delay, EventKind::Completed);
            Self::enqueue(connection, self.profile.close_delay, EventKind::Closed);
        }

        Ok(())
    }

    async fn cancel(&self, handle: &TransportHandle) -> TransportResult<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);

        if self.profile.honor_cancel {
            if let Some(binding) = self.lock().get(&handle.id).and_then(|c| c.binding.as_ref()) {
                binding.suppressed.store(true, Ordering::SeqCst);
            }
        }

        Ok(())
    }

    async fn finish(&self, handle: &TransportHandle, session_id: &str) {
        let mut connections = self.lock();
        let Some(connection) = connections.get_mut(&handle.id) else {
            return;
        };
        // A long-lived connection may already carry the next request
        if connection.binding.as_ref().is_some_and(|b| b.session_id == session_id) {
            connection.binding = None;
        }
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }

    async fn release(&self, handle: TransportHandle) {
        // Dropping the queue sender lets the delivery task drain and exit
        if self.lock().remove(&handle.id).is_some() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
