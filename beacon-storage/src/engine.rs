//! Aggregation query engine.
//!
//! Sanitizes free-form inputs, normalizes step lists and windows, then
//! delegates to the configured [`ColumnarStore`].

use std::sync::Arc;

use beacon_core::query::{MAX_CONVERSION_WINDOW_DAYS, MAX_FUNNEL_STEPS, MAX_RECENT_LIMIT};
use beacon_core::sanitize::{safe_event_name, safe_project_id};
use beacon_core::{
    AggregationQuery, AggregationResult, FunnelQuery, FunnelResult, RecentEventsQuery,
    StoreResult, StoredEvent, TrendQuery, TrendResult,
};
use tracing::debug;

use crate::store::ColumnarStore;

/// Trend, funnel and recent-events queries over a shared store.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn ColumnarStore>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine").finish_non_exhaustive()
    }
}

impl QueryEngine {
    pub fn new(store: Arc<dyn ColumnarStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ColumnarStore> {
        &self.store
    }

    /// Time-bucketed counts. An unusable event name yields empty arrays.
    pub async fn trend(&self, query: &TrendQuery) -> StoreResult<TrendResult> {
        let query = Self::normalize_trend(query);
        if query.event.is_empty() {
            return Ok(TrendResult::default());
        }
        debug!(project_id = %query.project_id, interval = query.interval.as_str(), "Running trend query");
        self.store.trend(&query).await
    }

    /// Per-step counts in the requested mode.
    ///
    /// At most 20 steps are considered and unusable step names are dropped.
    /// Fewer than two remaining steps yield an empty result without touching
    /// the store.
    pub async fn funnel(&self, query: &FunnelQuery) -> StoreResult<FunnelResult> {
        let query = Self::normalize_funnel(query);
        if query.steps.len() < 2 {
            return Ok(FunnelResult::from_counts(
                &[],
                &[],
                query.mode,
                query.conversion_window_days,
            ));
        }

        debug!(
            project_id = %query.project_id,
            steps = query.steps.len(),
            mode = ?query.mode,
            "Running funnel query"
        );
        let counts = self.store.funnel(&query).await?;
        Ok(FunnelResult::from_counts(
            &query.steps,
            &counts,
            query.mode,
            query.conversion_window_days,
        ))
    }

    /// The query as the store will see it.
    ///
    /// Logically identical requests normalize to the same value, so this is
    /// the form to derive cache keys from. Normalizing twice is a no-op.
    pub fn normalize(query: &AggregationQuery) -> AggregationQuery {
        match query {
            AggregationQuery::Trend(q) => AggregationQuery::Trend(Self::normalize_trend(q)),
            AggregationQuery::Funnel(q) => AggregationQuery::Funnel(Self::normalize_funnel(q)),
        }
    }

    /// Sanitized project id; an unusable event name becomes empty.
    fn normalize_trend(query: &TrendQuery) -> TrendQuery {
        TrendQuery {
            project_id: safe_project_id(&query.project_id),
            event: safe_event_name(&query.event)
                .unwrap_or_default()
                .to_string(),
            ..query.clone()
        }
    }

    fn normalize_funnel(query: &FunnelQuery) -> FunnelQuery {
        let steps = query
            .steps
            .iter()
            .take(MAX_FUNNEL_STEPS)
            .filter_map(|s| safe_event_name(s).map(str::to_string))
            .collect();
        FunnelQuery {
            project_id: safe_project_id(&query.project_id),
            steps,
            conversion_window_days: query
                .conversion_window_days
                .clamp(1, MAX_CONVERSION_WINDOW_DAYS),
            ..query.clone()
        }
    }

    pub async fn recent(&self, query: &RecentEventsQuery) -> StoreResult<Vec<StoredEvent>> {
        let query = RecentEventsQuery {
            project_id: safe_project_id(&query.project_id),
            limit: query.limit.clamp(1, MAX_RECENT_LIMIT),
        };
        self.store.recent(&query).await
    }

    /// Dispatch a cacheable aggregation.
    pub async fn run(&self, query: &AggregationQuery) -> StoreResult<AggregationResult> {
        match query {
            AggregationQuery::Trend(q) => self.trend(q).await.map(AggregationResult::from),
            AggregationQuery::Funnel(q) => self.funnel(q).await.map(AggregationResult::from),
        }
    }
}
