//! Runs one coordinator per concurrency slot and collects the results

use crate::audio::AudioSource;
use crate::session::{CoordinatorReport, IterationReport, SessionConfig, SessionContext, SessionCoordinator};
use crate::telemetry::TelemetrySnapshot;
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Coordinators running in parallel
    pub concurrency: usize,
    pub session: SessionConfig,
    /// Wall-clock limit; coordinators finish their current iteration once
    /// it elapses
    pub duration: Option<Duration>,
}

/// Result of a whole run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub snapshot: TelemetrySnapshot,
    pub workers: Vec<CoordinatorReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn iterations(&self) -> impl Iterator<Item = &IterationReport> {
        self.workers.iter().flat_map(|worker| worker.iterations.iter())
    }
}

pub struct WorkerPool {
    config: PoolConfig,
    context: SessionContext,
    sources: Vec<Arc<AudioSource>>,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, context: SessionContext, sources: Vec<AudioSource>) -> Self {
        Self {
            config,
            context,
            sources: sources.into_iter().map(Arc::new).collect(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flag observed by every coordinator between iterations; clearing it
    /// ends the run
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub async fn run(self) -> Result<RunSummary> {
        if self.sources.is_empty() {
            bail!("No audio source to replay");
        }

        let started = Instant::now();
        info!(
            "Starting {} worker(s) over {} source(s) via {}",
            self.config.concurrency,
            self.sources.len(),
            self.context.transport.name()
        );

        let timer = self.config.duration.map(|duration| {
            let running = Arc::clone(&self.running);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                info!("Run duration of {:?} elapsed, finishing current iterations", duration);
                running.store(false, Ordering::SeqCst);
            })
        });

        let mut workers = JoinSet::new();
        for worker in 0..self.config.concurrency {
            // Round-robin when there are fewer sources than workers
            let source = Arc::clone(&self.sources[worker % self.sources.len()]);
            let coordinator = SessionCoordinator::new(
                worker,
                self.config.session.clone(),
                self.context.clone(),
                source,
                Arc::clone(&self.running),
            );
            workers.spawn(coordinator.run());
        }

        let mut reports = Vec::with_capacity(self.config.concurrency);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }
        reports.sort_by_key(|report| report.worker);

        if let Some(timer) = timer {
            timer.abort();
        }

        let elapsed = started.elapsed();
        info!("All workers finished in {:.1}s", elapsed.as_secs_f64());

        Ok(RunSummary {
            snapshot: self.context.telemetry.snapshot(),
            workers: reports,
            elapsed,
        })
    }
}
