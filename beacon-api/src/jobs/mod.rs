//! Async Query Jobs
//!
//! Aggregations that may exceed interactive deadlines run off the request
//! path:
//!
//! - `store`: job records and the swappable [`JobStore`] interface
//! - `runner`: submits queries and exposes their state to pollers
//! - `sweep`: background task evicting expired jobs
//! - `cache_purge`: background task dropping expired result cache entries
//!
//! # Usage
//!
//! ```ignore
//! use beacon_api::jobs::{job_sweep_task, InMemoryJobStore, JobRunner, JobSweepConfig};
//! use tokio::sync::watch;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let runner = JobRunner::new(store.clone(), query_service, job_ttl);
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(job_sweep_task(store, JobSweepConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod cache_purge;
pub mod runner;
pub mod store;
pub mod sweep;

pub use cache_purge::{cache_purge_task, CachePurgeConfig, CachePurgeMetrics, CachePurgeSnapshot};
pub use runner::{JobRunner, JobView};
pub use store::{AsyncJob, InMemoryJobStore, JobStatus, JobStore};
pub use sweep::{job_sweep_task, JobSweepConfig, JobSweepMetrics, JobSweepSnapshot};
