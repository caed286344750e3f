//! Beacon Storage - Columnar Store, Aggregation Engine and Result Cache
//!
//! Defines the columnar store abstraction the loader writes to and the query
//! engine reads from, with an in-memory implementation for tests and local
//! runs and a ClickHouse implementation for production.

pub mod aggregate;
pub mod cache;
pub mod clickhouse;
pub mod engine;
pub mod memory;
pub mod store;

pub use cache::{cache_key, CacheError, CacheKey, MemoryResultCache, ResultCache};
pub use clickhouse::{ClickHouseConfig, ClickHouseStore};
pub use engine::QueryEngine;
pub use memory::MemoryColumnarStore;
pub use store::ColumnarStore;
