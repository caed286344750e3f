//! Cached query execution.
//!
//! Wraps the [`QueryEngine`] with the advisory result cache: a cache failure
//! on either lookup or store is logged and the query is computed directly.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    AggregationQuery, AggregationResult, FunnelQuery, FunnelResult, RecentEventsQuery,
    StoreResult, StoredEvent, TrendQuery, TrendResult,
};
use beacon_storage::{CacheKey, QueryEngine, ResultCache};
use tracing::{debug, warn};

use crate::telemetry::metrics;

/// Aggregation entry point shared by the sync and async query paths.
#[derive(Clone)]
pub struct QueryService {
    engine: QueryEngine,
    cache: Option<Arc<dyn ResultCache>>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("cached", &self.cache.is_some())
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl QueryService {
    pub fn new(engine: QueryEngine) -> Self {
        Self {
            engine,
            cache: None,
            cache_ttl: Duration::ZERO,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Run an aggregation, consulting the cache first.
    pub async fn run(&self, query: &AggregationQuery) -> StoreResult<AggregationResult> {
        let Some(cache) = &self.cache else {
            return self.engine.run(query).await;
        };

        let query = QueryEngine::normalize(query);
        let key = CacheKey::for_query(&query);
        match cache.get(&key).await {
            Ok(Some(result)) => {
                record_lookup("hit");
                debug!(key = %key.as_str(), "Query cache hit");
                return Ok(result);
            }
            Ok(None) => record_lookup("miss"),
            Err(e) => {
                record_lookup("error");
                warn!(error = %e, "Query cache lookup failed; computing directly");
            }
        }

        let result = self.engine.run(&query).await?;
        if let Err(e) = cache.put(&key, &result, self.cache_ttl).await {
            warn!(error = %e, "Failed to store query result in cache");
        }
        Ok(result)
    }

    pub async fn trend(&self, query: TrendQuery) -> StoreResult<TrendResult> {
        match self.run(&AggregationQuery::Trend(query)).await? {
            AggregationResult::Trend(result) => Ok(result),
            // A cached entry of the wrong shape is treated as empty.
            AggregationResult::Funnel(_) => Ok(TrendResult::default()),
        }
    }

    pub async fn funnel(&self, query: FunnelQuery) -> StoreResult<FunnelResult> {
        let fallback = query.clone();
        match self.run(&AggregationQuery::Funnel(query)).await? {
            AggregationResult::Funnel(result) => Ok(result),
            AggregationResult::Trend(_) => self.engine.funnel(&fallback).await,
        }
    }

    /// Recent events are never cached.
    pub async fn recent(&self, query: &RecentEventsQuery) -> StoreResult<Vec<StoredEvent>> {
        self.engine.recent(query).await
    }
}

fn record_lookup(result: &str) {
    if let Some(m) = metrics() {
        m.record_cache_lookup(result);
    }
}
