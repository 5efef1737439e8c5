//! Periodic execution of the rebase pipeline.
//!
//! The scheduler runs the pipeline once immediately and then on a fixed
//! interval until a [`Shutdown`] is triggered. Shutdown is only observed
//! between runs, so a run in progress always completes first. Ticks that
//! fire while a run is still executing are skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::errors::PipelineError;
use crate::pipeline::{Pipeline, RunSummary};

/// One unit of scheduled work.
#[async_trait]
pub trait RebaseJob: Send + Sync {
    async fn run(&self) -> Result<RunSummary, PipelineError>;
}

#[async_trait]
impl RebaseJob for Pipeline {
    async fn run(&self) -> Result<RunSummary, PipelineError> {
        Pipeline::run(self).await
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Cloneable cancellation handle.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        loop {
            // Register before checking the flag so a trigger in between is not lost.
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters for the scheduler's lifetime.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub total_runs: AtomicU64,
    pub total_failures: AtomicU64,
    pub consecutive_failures: AtomicU64,
    pub total_conflicts: AtomicU64,
    pub skipped_ticks: AtomicU64,
}

impl SchedulerStats {
    fn record_success(&self, summary: &RunSummary) {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.total_conflicts
            .fetch_add(summary.conflicted_files.len() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) -> u64 {
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    job: Arc<dyn RebaseJob>,
    interval: Duration,
    run_once: bool,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn RebaseJob>, interval: Duration, run_once: bool) -> Self {
        Self {
            job,
            interval,
            run_once,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Run until `shutdown` fires. In run-once mode, run a single time and
    /// return that run's error, if any.
    pub async fn run(&self, shutdown: Shutdown) -> Result<(), PipelineError> {
        if shutdown.is_triggered() {
            info!("shutdown requested before the first run");
            return Ok(());
        }

        if self.run_once {
            info!("running once");
            return self.maybe_run().await.map(|_| ());
        }

        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        let _ = self.maybe_run().await;

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!("shutdown requested, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    let _ = self.maybe_run().await;
                }
            }
        }

        info!(
            runs = self.stats.total_runs.load(Ordering::Relaxed),
            failures = self.stats.total_failures.load(Ordering::Relaxed),
            "scheduler stopped"
        );
        Ok(())
    }

    /// Run the job once. A run the pipeline rejects as overlapping counts
    /// as a skipped tick and yields `Ok(None)`.
    async fn maybe_run(&self) -> Result<Option<RunSummary>, PipelineError> {
        info!("starting rebase run");
        let result = self.job.run().await;

        match result {
            Ok(summary) => {
                self.stats.record_success(&summary);
                info!(
                    branch = %summary.branch,
                    conflicts = summary.conflicted_files.len(),
                    pr = ?summary.pull_request.as_ref().map(|pr| pr.number),
                    "rebase run finished"
                );
                Ok(Some(summary))
            }
            Err(PipelineError::AlreadyRunning) => {
                self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                warn!("pipeline reported a run already in progress");
                Ok(None)
            }
            Err(e) => {
                let consecutive = self.stats.record_failure();
                error!(error = %e, consecutive_failures = consecutive, "rebase run failed");
                Err(e)
            }
        }
    }
}
