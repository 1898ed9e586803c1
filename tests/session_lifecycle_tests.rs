// Integration tests for session lifecycles
//
// These tests drive coordinators against the simulated service and check
// phases, counters, the failure log and deferred release.

use anyhow::Result;
use asr_loadtest::audio::{AudioFormat, AudioSource};
use asr_loadtest::session::{IterationOutcome, Phase, SessionConfig, SessionContext};
use asr_loadtest::telemetry::{FailureLog, LatencyPhase, TelemetryAggregator};
use asr_loadtest::transport::{event_channel, ConnectionMode, SimulatedTransport, SimulationProfile};
use asr_loadtest::{CredentialCache, EventDispatcher, PoolConfig, RunSummary, StaticCredential, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Harness {
    transport: Arc<SimulatedTransport>,
    dispatcher: Arc<EventDispatcher>,
    telemetry: Arc<TelemetryAggregator>,
    log_path: PathBuf,
    _temp_dir: TempDir,
}

impl Harness {
    fn new(profile: SimulationProfile) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let log_path = temp_dir.path().join("transcriptionTaskFailed.log");

        let telemetry = Arc::new(TelemetryAggregator::new());
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&telemetry),
            Arc::new(FailureLog::new(&log_path)),
        ));
        let (sink, events) = event_channel();
        let transport = Arc::new(SimulatedTransport::new(profile, sink));
        tokio::spawn(Arc::clone(&dispatcher).run(events));

        Ok(Self {
            transport,
            dispatcher,
            telemetry,
            log_path,
            _temp_dir: temp_dir,
        })
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            transport: self.transport.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            telemetry: Arc::clone(&self.telemetry),
            credentials: Arc::new(CredentialCache::new(Box::new(StaticCredential::new("token", None)))),
        }
    }

    async fn run(&self, concurrency: usize, session: SessionConfig, frames: usize) -> Result<RunSummary> {
        let source = AudioSource::from_bytes("memory", vec![0u8; frames * 3200], AudioFormat::default());
        let config = PoolConfig {
            concurrency,
            session,
            duration: None,
        };
        WorkerPool::new(config, self.context(), vec![source]).run().await
    }

    fn failure_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log_path)
            .map(|contents| contents.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        pacing: false,
        start_timeout: Duration::from_millis(300),
        stop_timeout: Duration::from_millis(300),
        release_grace: Duration::from_millis(200),
        loop_count: 1,
        ..SessionConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unacknowledged_starts_are_cancelled() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        start_ack_delay: None,
        ..SimulationProfile::default()
    })?;

    let started = Instant::now();
    let summary = harness.run(4, fast_config(), 10).await?;
    assert!(started.elapsed() >= Duration::from_millis(300));

    let iterations: Vec<_> = summary.iterations().collect();
    assert_eq!(iterations.len(), 4);
    for iteration in iterations {
        assert_eq!(iteration.outcome, IterationOutcome::Cancelled);
        assert_eq!(iteration.phase, Phase::Cancelled);
        assert_eq!(iteration.frames_sent, 0);
    }

    let counters = summary.snapshot.counters;
    assert_eq!(counters.requested, 4);
    assert_eq!(counters.cancelled, 4);
    assert_eq!(counters.started, 0);
    assert_eq!(counters.resolved(), counters.requested);

    let stats = harness.transport.stats();
    assert_eq!(stats.cancels, 4);
    assert_eq!(stats.frames_accepted, 0);
    assert_eq!(harness.transport.open_connections(), 0);
    assert!(harness.failure_lines().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_send_error_ends_streaming() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        fail_send_at: Some(10),
        ..SimulationProfile::default()
    })?;

    let summary = harness.run(1, fast_config(), 20).await?;
    let iteration = summary.iterations().next().expect("one iteration");

    assert_eq!(iteration.frames_sent, 9);
    assert!(iteration.send_error.is_some());
    assert_eq!(iteration.outcome, IterationOutcome::Completed);
    assert_eq!(harness.transport.stats().stops, 1);
    assert_eq!(harness.transport.stats().frames_accepted, 9);
    assert_eq!(summary.snapshot.send.frames, 9);
    assert_eq!(summary.snapshot.counters.completed_successfully, 1);
    Ok(())
}

#[tokio::test]
async fn test_task_failure_mid_stream() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        task_failure_after_frames: Some(5),
        close_after_failure: true,
        ..SimulationProfile::default()
    })?;

    let summary = harness.run(1, fast_config(), 20).await?;
    let iteration = summary.iterations().next().expect("one iteration");

    assert_eq!(iteration.outcome, IterationOutcome::TaskFailed);
    assert_eq!(iteration.phase, Phase::Failed);
    assert_eq!(iteration.frames_sent, 5);

    // The Closed that follows the failure is not honored
    let counters = summary.snapshot.counters;
    assert_eq!(counters.task_failed, 1);
    assert_eq!(counters.closed, 0);
    assert_eq!(counters.completed_successfully, 0);
    assert_eq!(summary.snapshot.phase(LatencyPhase::Close).count, 0);

    let lines = harness.failure_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(&format!("task_id:{}", iteration.session_id)));
    assert!(lines[0].contains("status_code:40000000"));
    assert!(lines[0].ends_with("error_message:simulated task failure"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_latencies_aggregate() -> Result<()> {
    let harness = Harness::new(SimulationProfile::default())?;

    let summary = harness.run(2, fast_config(), 10).await?;

    let start_ack = summary.snapshot.phase(LatencyPhase::StartAck);
    assert_eq!(start_ack.count, 2);
    assert!(start_ack.min_ms >= 30);
    assert!(start_ack.min_ms as f64 <= start_ack.average_ms());
    assert!(start_ack.average_ms() <= start_ack.max_ms as f64);
    assert_eq!(start_ack.total_ms, {
        let workers = &summary.snapshot;
        workers.worker_phase(0, LatencyPhase::StartAck).total_ms + workers.worker_phase(1, LatencyPhase::StartAck).total_ms
    });

    // Close latency includes the start acknowledgment
    let close = summary.snapshot.phase(LatencyPhase::Close);
    assert_eq!(close.count, 2);
    assert!(close.min_ms >= start_ack.min_ms);

    let counters = summary.snapshot.counters;
    assert_eq!(counters.started, 2);
    assert_eq!(counters.closed, 2);
    assert_eq!(counters.completed_successfully, 2);
    assert_eq!(summary.snapshot.start_histogram.total(), 2);
    assert_eq!(harness.transport.open_connections(), 0);
    Ok(())
}

#[tokio::test]
async fn test_late_start_after_cancel_is_ignored() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        start_ack_delay: Some(Duration::from_millis(150)),
        honor_cancel: false,
        ..SimulationProfile::default()
    })?;

    let config = SessionConfig {
        start_timeout: Duration::from_millis(50),
        release_grace: Duration::from_millis(400),
        ..fast_config()
    };
    let summary = harness.run(1, config, 5).await?;

    let iteration = summary.iterations().next().expect("one iteration");
    assert_eq!(iteration.outcome, IterationOutcome::Cancelled);

    let counters = summary.snapshot.counters;
    assert_eq!(counters.cancelled, 1);
    assert_eq!(counters.started, 0);
    assert_eq!(summary.snapshot.phase(LatencyPhase::StartAck).count, 0);
    Ok(())
}

#[tokio::test]
async fn test_start_rejection_releases_immediately() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        reject_start: true,
        ..SimulationProfile::default()
    })?;

    let summary = harness.run(1, fast_config(), 5).await?;
    let iteration = summary.iterations().next().expect("one iteration");

    assert_eq!(iteration.outcome, IterationOutcome::StartFailed);
    assert_eq!(iteration.phase, Phase::Failed);
    assert_eq!(summary.snapshot.counters.start_failed, 1);
    assert_eq!(harness.transport.stats().releases, 1);
    assert!(summary.elapsed < Duration::from_millis(200));
    Ok(())
}

#[tokio::test]
async fn test_create_failure_ends_worker() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        fail_create: true,
        ..SimulationProfile::default()
    })?;

    let config = SessionConfig {
        loop_count: 5,
        ..fast_config()
    };
    let summary = harness.run(1, config, 5).await?;

    assert_eq!(summary.iterations().count(), 1);
    let counters = summary.snapshot.counters;
    assert_eq!(counters.create_failed, 1);
    assert_eq!(counters.requested, 0);
    assert_eq!(harness.transport.stats().starts, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_close_times_out() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        stop_ack_delay: None,
        ..SimulationProfile::default()
    })?;

    let summary = harness.run(1, fast_config(), 5).await?;
    let iteration = summary.iterations().next().expect("one iteration");

    assert_eq!(iteration.outcome, IterationOutcome::StopTimedOut);
    assert_eq!(summary.snapshot.counters.stop_timed_out, 1);
    assert_eq!(summary.snapshot.counters.resolved(), 1);
    // Released only after the grace window
    assert!(summary.elapsed >= Duration::from_millis(500));
    assert_eq!(harness.transport.open_connections(), 0);
    Ok(())
}

#[tokio::test]
async fn test_completed_without_close_counts_as_success() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        stop_ack_delay: Some(Duration::from_millis(10)),
        close_delay: Duration::from_millis(400),
        ..SimulationProfile::default()
    })?;

    let config = SessionConfig {
        release_grace: Duration::from_millis(600),
        ..fast_config()
    };
    let summary = harness.run(1, config, 5).await?;
    let iteration = summary.iterations().next().expect("one iteration");

    assert_eq!(iteration.outcome, IterationOutcome::Completed);
    let counters = summary.snapshot.counters;
    assert_eq!(counters.completed_successfully, 1);
    // The late Closed arrives after the session was abandoned
    assert_eq!(counters.closed, 0);
    assert_eq!(summary.snapshot.phase(LatencyPhase::Completion).count, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_long_lived_connection_is_reused() -> Result<()> {
    let harness = Harness::new(SimulationProfile::default())?;

    let config = SessionConfig {
        connection_mode: ConnectionMode::LongLived,
        loop_count: 3,
        ..fast_config()
    };
    let summary = harness.run(2, config, 4).await?;

    assert_eq!(summary.iterations().count(), 6);
    assert!(summary
        .iterations()
        .all(|iteration| iteration.outcome == IterationOutcome::Completed));

    let stats = harness.transport.stats();
    assert_eq!(stats.creates, 2);
    assert_eq!(stats.starts, 6);
    assert_eq!(stats.releases, 2);
    assert_eq!(stats.finishes, 6);
    assert_eq!(summary.snapshot.counters.completed_successfully, 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_long_lived_connection_drops_each_cancelled_session() -> Result<()> {
    let harness = Harness::new(SimulationProfile {
        start_ack_delay: None,
        ..SimulationProfile::default()
    })?;

    let config = SessionConfig {
        connection_mode: ConnectionMode::LongLived,
        loop_count: 4,
        start_timeout: Duration::from_millis(50),
        release_grace: Duration::from_millis(20),
        ..fast_config()
    };
    let summary = harness.run(1, config, 4).await?;

    assert!(summary
        .iterations()
        .all(|iteration| iteration.outcome == IterationOutcome::Cancelled));

    let stats = harness.transport.stats();
    assert_eq!(stats.creates, 1);
    assert_eq!(stats.starts, 4);
    assert_eq!(stats.finishes, 4);
    assert_eq!(stats.releases, 1);
    assert_eq!(harness.transport.bound_connections(), 0);
    assert!(harness.dispatcher.live_sessions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_expired_token_fails_start() -> Result<()> {
    let harness = Harness::new(SimulationProfile::default())?;
    let expired = chrono::Utc::now() - chrono::Duration::minutes(1);
    let context = SessionContext {
        credentials: Arc::new(CredentialCache::new(Box::new(StaticCredential::new("old", Some(expired))))),
        ..harness.context()
    };

    let source = AudioSource::from_bytes("memory", vec![0u8; 3200], AudioFormat::default());
    let config = PoolConfig {
        concurrency: 1,
        session: fast_config(),
        duration: None,
    };
    let summary = WorkerPool::new(config, context, vec![source]).run().await?;

    let counters = summary.snapshot.counters;
    assert_eq!(counters.requested, 1);
    assert_eq!(counters.start_failed, 1);
    assert_eq!(harness.transport.stats().starts, 0);
    Ok(())
}

#[tokio::test]
async fn test_duration_bounds_unlimited_loops() -> Result<()> {
    let harness = Harness::new(SimulationProfile::default())?;
    let source = AudioSource::from_bytes("memory", vec![0u8; 3200], AudioFormat::default());

    let config = PoolConfig {
        concurrency: 1,
        session: SessionConfig {
            loop_count: 0,
            ..fast_config()
        },
        duration: Some(Duration::from_millis(250)),
    };
    let summary = WorkerPool::new(config, harness.context(), vec![source]).run().await?;

    let counters = summary.snapshot.counters;
    assert!(counters.requested >= 2);
    assert_eq!(counters.resolved(), counters.requested);
    assert!(summary.elapsed < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn test_pacing_follows_audio_duration() -> Result<()> {
    let harness = Harness::new(SimulationProfile::default())?;

    let config = SessionConfig {
        pacing: true,
        frame_bytes: 320,
        ..fast_config()
    };
    // 10 frames of 10 ms each
    let source = AudioSource::from_bytes("memory", vec![0u8; 3200], AudioFormat::default());
    let pool = PoolConfig {
        concurrency: 1,
        session: config,
        duration: None,
    };

    let started = Instant::now();
    let summary = WorkerPool::new(pool, harness.context(), vec![source]).run().await?;

    assert_eq!(summary.snapshot.send.frames, 10);
    assert_eq!(summary.snapshot.audio.average_ms(), 100);
    assert!(started.elapsed() >= Duration::from_millis(90));
    Ok(())
}
