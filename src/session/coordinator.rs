use super::config::SessionConfig;
use super::handle::SessionHandle;
use super::phase::{Phase, SessionId};
use crate::audio::AudioSource;
use crate::credentials::CredentialCache;
use crate::dispatcher::EventDispatcher;
use crate::error::TransportError;
use crate::telemetry::{Counter, TelemetryAggregator};
use crate::transport::{ConnectionMode, Transport, TransportHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Collaborators shared by every coordinator of a run
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn Transport>,
    pub dispatcher: Arc<EventDispatcher>,
    pub telemetry: Arc<TelemetryAggregator>,
    pub credentials: Arc<CredentialCache>,
}

/// How one lifecycle iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    /// No transport handle; `start` was never called
    CreateFailed,
    StartFailed,
    /// No start acknowledgment in time
    Cancelled,
    TaskFailed,
    Completed,
    StopTimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub session_id: String,
    pub outcome: IterationOutcome,
    /// Successful `send_frame` calls
    pub frames_sent: usize,
    /// Error that ended streaming early
    pub send_error: Option<String>,
    pub phase: Phase,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorReport {
    pub worker: usize,
    pub iterations: Vec<IterationReport>,
}

/// Drives one worker's session lifecycles, one iteration at a time
pub struct SessionCoordinator {
    worker: usize,
    config: SessionConfig,
    context: SessionContext,
    source: Arc<AudioSource>,
    running: Arc<AtomicBool>,
    /// Releases waiting out the late-event grace window
    pending_releases: JoinSet<()>,
    /// Connection reused across iterations in long-lived mode
    connection: Option<TransportHandle>,
}

impl SessionCoordinator {
    pub fn new(
        worker: usize,
        config: SessionConfig,
        context: SessionContext,
        source: Arc<AudioSource>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker,
            config,
            context,
            source,
            running,
            pending_releases: JoinSet::new(),
            connection: None,
        }
    }

    /// Run iterations until the loop count is reached, the shared flag is
    /// cleared, or the transport cannot create a session
    pub async fn run(mut self) -> CoordinatorReport {
        info!(
            "Worker {} started ({} via {}, {:?})",
            self.worker,
            self.source.path,
            self.context.transport.name(),
            self.config.connection_mode
        );

        let mut iterations = Vec::new();
        let mut iteration = 0u32;
        while self.running.load(Ordering::SeqCst) {
            if self.config.loop_count > 0 && iteration >= self.config.loop_count {
                break;
            }
            iteration += 1;

            let report = self.run_iteration(iteration).await;
            info!("{}: {:?} ({} frames)", report.session_id, report.outcome, report.frames_sent);

            let create_failed = report.outcome == IterationOutcome::CreateFailed;
            iterations.push(report);
            if create_failed {
                warn!("Worker {} stopping: transport could not create a session", self.worker);
                break;
            }

            while let Some(joined) = self.pending_releases.try_join_next() {
                self.reaped(joined);
            }
        }

        // Long-lived connections outlive every deferred session release
        while let Some(joined) = self.pending_releases.join_next().await {
            self.reaped(joined);
        }
        if let Some(handle) = self.connection.take() {
            self.context.transport.release(handle).await;
        }

        info!("Worker {} finished after {} iteration(s)", self.worker, iterations.len());
        CoordinatorReport {
            worker: self.worker,
            iterations,
        }
    }

    fn reaped(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            warn!("Worker {}: deferred release task failed: {}", self.worker, e);
        }
    }

    async fn acquire_handle(&mut self, id: &SessionId) -> Option<TransportHandle> {
        if let Some(handle) = &self.connection {
            return Some(handle.clone());
        }

        let mode = self.config.connection_mode;
        match self.context.transport.create(id.as_str(), mode).await {
            Ok(handle) => {
                if mode == ConnectionMode::LongLived {
                    self.connection = Some(handle.clone());
                }
                Some(handle)
            }
            Err(e) => {
                warn!("{}: {}", id, e);
                None
            }
        }
    }

    /// Free the session now; only valid once its final notice arrived
    async fn release_now(&self, session: &SessionHandle, handle: TransportHandle) {
        self.context.dispatcher.unregister(session.id().as_str());
        self.context.transport.finish(&handle, session.id().as_str()).await;
        if handle.mode == ConnectionMode::PerRequest {
            self.context.transport.release(handle).await;
        }
    }

    /// Keep the session routable until its final notice or the grace
    /// window, then free it
    fn release_later(&mut self, session: Arc<SessionHandle>, handle: TransportHandle) {
        let grace = self.config.release_grace;
        let transport = Arc::clone(&self.context.transport);
        let dispatcher = Arc::clone(&self.context.dispatcher);

        self.pending_releases.spawn(async move {
            if !session.wait_quiesced(grace).await {
                debug!("{}: no final notice within {:?}, releasing", session.id(), grace);
            }
            dispatcher.unregister(session.id().as_str());
            transport.finish(&handle, session.id().as_str()).await;
            if handle.mode == ConnectionMode::PerRequest {
                transport.release(handle).await;
            }
        });
    }

    /// Release a session whose phase was settled by an event
    async fn settle(&mut self, session: Arc<SessionHandle>, handle: TransportHandle) -> IterationOutcome {
        match session.phase() {
            Phase::Closed => {
                session.log_sentences();
                self.release_now(&session, handle).await;
                IterationOutcome::Completed
            }
            Phase::Cancelled => {
                self.release_later(session, handle);
                IterationOutcome::Cancelled
            }
            _ => {
                self.release_later(session, handle);
                IterationOutcome::TaskFailed
            }
        }
    }

    /// Give up waiting for the closing notice
    async fn abandon(&mut self, session: Arc<SessionHandle>, handle: TransportHandle) -> IterationOutcome {
        let Some(completed_seen) = session.abandon_stop() else {
            return self.settle(session, handle).await;
        };

        warn!(
            "{}: no closing notice within {:?}, releasing after {:?}",
            session.id(),
            self.config.stop_timeout,
            self.config.release_grace
        );
        let outcome = if completed_seen {
            self.context.telemetry.increment(Counter::CompletedSuccessfully);
            IterationOutcome::Completed
        } else {
            self.context.telemetry.increment(Counter::StopTimedOut);
            IterationOutcome::StopTimedOut
        };
        self.release_later(session, handle);
        outcome
    }

    async fn run_iteration(&mut self, iteration: u32) -> IterationReport {
        let id = SessionId::new(self.worker, iteration);
        let session = Arc::new(SessionHandle::new(id.clone()));
        let mut report = IterationReport {
            session_id: id.as_str().to_string(),
            outcome: IterationOutcome::CreateFailed,
            frames_sent: 0,
            send_error: None,
            phase: Phase::Idle,
        };

        let Some(handle) = self.acquire_handle(&id).await else {
            self.context.telemetry.increment(Counter::CreateFailed);
            return report;
        };

        let outcome = self.drive(&session, handle, &mut report).await;
        report.outcome = outcome;
        report.phase = session.phase();
        report
    }

    async fn drive(
        &mut self,
        session: &Arc<SessionHandle>,
        handle: TransportHandle,
        report: &mut IterationReport,
    ) -> IterationOutcome {
        let ctx = self.context.clone();
        let id = session.id().clone();

        ctx.dispatcher.register(Arc::clone(session));
        ctx.telemetry.increment(Counter::Requested);
        ctx.telemetry.record_audio(self.source.duration_ms);

        // Idle -> Starting
        session.begin_start();
        let mut params = self.config.start.clone();
        let started = match ctx.credentials.current() {
            Ok(credential) => {
                params.token = credential.token;
                ctx.transport.start(&handle, id.as_str(), &params).await
            }
            Err(e) => Err(TransportError::Rejected(format!("{:#}", e))),
        };
        if let Err(e) = started {
            warn!("{}: start failed: {}", id, e);
            if !session.reject_start() {
                return self.settle(Arc::clone(session), handle).await;
            }
            ctx.telemetry.increment(Counter::StartFailed);
            self.release_now(session, handle).await;
            return IterationOutcome::StartFailed;
        }

        // Starting -> Started | Cancelled
        let acknowledged = session
            .wait_until(|p| p != Phase::Starting, self.config.start_timeout)
            .await;
        if acknowledged.is_none() && session.cancel_start() {
            warn!("{}: no start acknowledgment within {:?}, cancelling", id, self.config.start_timeout);
            if let Err(e) = ctx.transport.cancel(&handle).await {
                warn!("{}: cancel failed: {}", id, e);
            }
            ctx.telemetry.increment(Counter::Cancelled);
            self.release_later(Arc::clone(session), handle);
            return IterationOutcome::Cancelled;
        }

        // Started -> Streaming
        if !session.begin_streaming() {
            return self.settle(Arc::clone(session), handle).await;
        }
        self.stream(session, &handle, report).await;

        // Streaming -> Stopping
        if !session.begin_stop() {
            return self.settle(Arc::clone(session), handle).await;
        }
        if let Err(e) = ctx.transport.stop(&handle).await {
            warn!("{}: stop failed: {}", id, e);
            return self.abandon(Arc::clone(session), handle).await;
        }

        match session
            .wait_until(|p| p.is_terminal(), self.config.stop_timeout)
            .await
        {
            Some(_) => self.settle(Arc::clone(session), handle).await,
            None => self.abandon(Arc::clone(session), handle).await,
        }
    }

    /// Push the source through `send_frame` until it is exhausted, a send
    /// fails, or an event ends the session
    async fn stream(&self, session: &SessionHandle, handle: &TransportHandle, report: &mut IterationReport) {
        let format = self.config.start.format;
        let mut send_time_us = 0u64;

        for frame in self.source.frames(self.config.frame_bytes) {
            if !session.is_streaming() {
                debug!("{}: streaming interrupted in phase {}", session.id(), session.phase());
                break;
            }

            let sent_at = Instant::now();
            let result = self
                .context
                .transport
                .send_frame(handle, frame, format.encoding)
                .await;
            let send_time = sent_at.elapsed();
            send_time_us += send_time.as_micros() as u64;

            if let Err(e) = result {
                warn!("{}: send failed after {} frames: {}", session.id(), report.frames_sent, e);
                report.send_error = Some(e.to_string());
                break;
            }
            report.frames_sent += 1;

            if self.config.pacing {
                let remaining = format.pacing_delay(frame.len()).saturating_sub(send_time);
                if remaining > Duration::ZERO {
                    tokio::time::sleep(remaining).await;
                }
            }
        }

        self.context
            .telemetry
            .record_send(report.frames_sent as u64, send_time_us);
    }
}
