//! Expired Job Sweep
//!
//! Jobs are evicted lazily when polled, but a job nobody polls again would
//! otherwise stay in memory until restart. This task removes expired jobs on
//! a fixed interval and stops on the shutdown signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::store::JobStore;
use crate::config::DEFAULT_JOB_SWEEP_INTERVAL_SECS;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the job sweep background task.
#[derive(Debug, Clone)]
pub struct JobSweepConfig {
    /// How often to sweep (default: 60 seconds)
    pub check_interval: Duration,
}

impl Default for JobSweepConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_JOB_SWEEP_INTERVAL_SECS),
        }
    }
}

impl JobSweepConfig {
    pub fn with_interval(check_interval: Duration) -> Self {
        Self { check_interval }
    }

    /// Create a configuration for development/testing with a short interval.
    pub fn development() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweep activity.
#[derive(Debug, Default)]
pub struct JobSweepMetrics {
    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,

    /// Total expired jobs removed since startup
    pub jobs_evicted: AtomicU64,
}

impl JobSweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> JobSweepSnapshot {
        JobSweepSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            jobs_evicted: self.jobs_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSweepSnapshot {
    pub sweep_cycles: u64,
    pub jobs_evicted: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Periodically evict expired jobs until the shutdown signal is received.
///
/// Returns the metrics collected during the task's lifetime.
pub async fn job_sweep_task(
    store: Arc<dyn JobStore>,
    config: JobSweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<JobSweepMetrics> {
    let metrics = Arc::new(JobSweepMetrics::new());

    let mut sweep_interval = interval(config.check_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        "Job sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Job sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                let evicted = store.sweep_expired().await;
                metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);
                metrics.jobs_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
                if evicted > 0 {
                    tracing::info!(evicted, "Evicted expired async jobs");
                } else {
                    tracing::trace!("Job sweep cycle completed with nothing to evict");
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        jobs_evicted = snapshot.jobs_evicted,
        "Job sweep task completed"
    );

    metrics
}
