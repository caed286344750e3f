//! Query service entry point.

use std::sync::Arc;

use beacon_api::config::{ApiConfig, QueryConfig};
use beacon_api::jobs::{
    cache_purge_task, job_sweep_task, CachePurgeConfig, InMemoryJobStore, JobRunner, JobSweepConfig,
};
use beacon_api::telemetry::{init_tracing, TelemetryConfig};
use beacon_api::{query_router, ApiError, ApiResult, QueryService, QueryState};
use beacon_storage::{ClickHouseStore, MemoryResultCache, QueryEngine};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::for_service("beacon-query"))?;

    let api_config = ApiConfig::from_env();
    let config = QueryConfig::from_env();

    let store = ClickHouseStore::new(config.clickhouse.clone())?;
    if let Err(e) = store.ensure_schema().await {
        tracing::warn!(error = %e, "Could not ensure the events table exists; continuing");
    }

    let cache = Arc::new(MemoryResultCache::new());
    let queries = QueryService::new(QueryEngine::new(Arc::new(store)))
        .with_cache(cache.clone(), config.cache_ttl);
    let job_store = Arc::new(InMemoryJobStore::new());
    let jobs = JobRunner::new(job_store.clone(), queries.clone(), config.job_ttl);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = tokio::spawn(job_sweep_task(
        job_store,
        JobSweepConfig::with_interval(config.job_sweep_interval),
        shutdown_rx.clone(),
    ));
    let purge = tokio::spawn(cache_purge_task(
        cache,
        CachePurgeConfig::with_interval(config.cache_ttl),
        shutdown_rx,
    ));

    let state = QueryState::new(queries, jobs).with_request_timeout(config.request_timeout);
    let app = query_router(state, &api_config);

    let addr = api_config.query_addr()?;
    tracing::info!(%addr, "Starting beacon query service");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep.await {
        tracing::warn!(error = %e, "Job sweep task did not stop cleanly");
    }
    if let Err(e) = purge.await {
        tracing::warn!(error = %e, "Cache purge task did not stop cleanly");
    }
    Ok(())
}
