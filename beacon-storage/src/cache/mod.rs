//! Result cache for aggregation queries.
//!
//! Entries are keyed by a content hash of (project, query type, parameters)
//! and expire after a time-to-live. The cache is advisory: callers treat a
//! [`CacheError`] as a miss and compute directly.

pub mod key;
pub mod memory;

use std::time::Duration;

use ::async_trait::async_trait;
use beacon_core::AggregationResult;
use thiserror::Error;

pub use key::{cache_key, canonical_json, CacheKey, CACHE_KEY_PREFIX};
pub use memory::MemoryResultCache;

/// Cache backend failures. Never fatal to the query path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("cached value could not be decoded: {reason}")]
    Serialization { reason: String },
}

/// Pluggable result cache backend.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Stored result for `key`, or `None` when absent or expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<AggregationResult>, CacheError>;

    /// Store `result` under `key` for `ttl`.
    async fn put(
        &self,
        key: &CacheKey,
        result: &AggregationResult,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}
