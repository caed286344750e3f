//! Result Cache Purge
//!
//! Expired cache entries are dropped lazily when their key is read again. A
//! parameter set that is never repeated would stay in the map until restart,
//! so this task purges expired entries on a fixed interval and stops on the
//! shutdown signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_storage::MemoryResultCache;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::DEFAULT_QUERY_CACHE_TTL_SECS;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the cache purge background task.
#[derive(Debug, Clone)]
pub struct CachePurgeConfig {
    /// How often to purge (default: the default cache TTL)
    pub check_interval: Duration,
}

impl Default for CachePurgeConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_QUERY_CACHE_TTL_SECS),
        }
    }
}

impl CachePurgeConfig {
    /// Purge every `check_interval`, at least once per second.
    pub fn with_interval(check_interval: Duration) -> Self {
        Self {
            check_interval: check_interval.max(Duration::from_secs(1)),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct CachePurgeMetrics {
    /// Total purge cycles completed
    pub purge_cycles: AtomicU64,

    /// Total expired entries removed since startup
    pub entries_purged: AtomicU64,
}

impl CachePurgeMetrics {
    pub fn snapshot(&self) -> CachePurgeSnapshot {
        CachePurgeSnapshot {
            purge_cycles: self.purge_cycles.load(Ordering::Relaxed),
            entries_purged: self.entries_purged.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePurgeSnapshot {
    pub purge_cycles: u64,
    pub entries_purged: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Periodically drop expired result cache entries until shutdown.
pub async fn cache_purge_task(
    cache: Arc<MemoryResultCache>,
    config: CachePurgeConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CachePurgeMetrics> {
    let metrics = Arc::new(CachePurgeMetrics::default());

    let mut purge_interval = interval(config.check_interval);
    purge_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        check_interval_secs = config.check_interval.as_secs(),
        "Cache purge task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache purge task shutting down");
                    break;
                }
            }

            _ = purge_interval.tick() => {
                let purged = cache.purge_expired().await;
                metrics.purge_cycles.fetch_add(1, Ordering::Relaxed);
                metrics.entries_purged.fetch_add(purged as u64, Ordering::Relaxed);
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired cache entries");
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        purge_cycles = snapshot.purge_cycles,
        entries_purged = snapshot.entries_purged,
        "Cache purge task completed"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{AggregationResult, TrendResult};
    use beacon_storage::{cache_key, ResultCache};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_purge_bounds_never_repeated_keys() {
        let cache = Arc::new(MemoryResultCache::new());
        let result = AggregationResult::Trend(TrendResult::default());
        for n in 0..1000 {
            let key = cache_key("default", "trend", &json!({ "n": n }));
            cache.put(&key, &result, Duration::from_secs(1)).await.unwrap();
        }
        let live = cache_key("default", "trend", &json!({ "n": "live" }));
        cache.put(&live, &result, Duration::from_secs(3600)).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(cache_purge_task(
            cache.clone(),
            CachePurgeConfig::with_interval(Duration::from_secs(60)),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.get(&live).await.unwrap().is_some());

        shutdown_tx.send(true).unwrap();
        let snapshot = handle.await.unwrap().snapshot();
        assert_eq!(snapshot.entries_purged, 1000);
        assert!(snapshot.purge_cycles >= 2);
    }

    #[test]
    fn test_interval_has_a_floor() {
        assert_eq!(
            CachePurgeConfig::with_interval(Duration::ZERO).check_interval,
            Duration::from_secs(1)
        );
    }
}
