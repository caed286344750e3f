//! Columnar store contract.
//!
//! The loader writes rows through this trait and the aggregation engine reads
//! through it. Implementations must be safe for concurrent use; the engine
//! shares one instance across request handlers.

use ::async_trait::async_trait;
use beacon_core::{
    EventRow, FunnelQuery, RecentEventsQuery, StoreResult, StoredEvent, TrendQuery, TrendResult,
};

/// Async columnar store operations.
///
/// Inputs reaching the query methods have already been sanitized by
/// [`crate::QueryEngine`]; backends still bind them as parameters.
#[async_trait]
pub trait ColumnarStore: Send + Sync {
    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Bulk insert. Either every row is written or an error is returned.
    async fn insert_batch(&self, rows: &[EventRow]) -> StoreResult<()>;

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Counts per non-empty bucket, ascending by bucket start.
    async fn trend(&self, query: &TrendQuery) -> StoreResult<TrendResult>;

    /// One count per step, in step order. Mode decides simple vs strict.
    async fn funnel(&self, query: &FunnelQuery) -> StoreResult<Vec<u64>>;

    /// Most recent events first.
    async fn recent(&self, query: &RecentEventsQuery) -> StoreResult<Vec<StoredEvent>>;

    /// Cheap liveness probe used by readiness checks.
    async fn ping(&self) -> StoreResult<()>;
}
