//! Loader entry point: drains the events topic into ClickHouse.

use std::sync::Arc;

use beacon_api::config::QueryConfig;
use beacon_api::telemetry::{init_tracing, TelemetryConfig};
use beacon_api::{ApiError, ApiResult};
use beacon_pipeline::{DeadLetterSink, Loader, LoaderConfig, LogConsumer, LogProducer};
use beacon_storage::ClickHouseStore;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::for_service("beacon-loader"))?;

    let config = LoaderConfig::from_env();
    let clickhouse = QueryConfig::from_env().clickhouse;

    let store = ClickHouseStore::new(clickhouse)?;
    if let Err(e) = store.ensure_schema().await {
        tracing::warn!(error = %e, "Could not ensure the events table exists; continuing");
    }

    let (consumer, producer) = build_log(&config)?;
    let dead_letters = DeadLetterSink::new(producer, config.dead_letter_topic.clone());
    let loader = Loader::new(consumer, Arc::new(store), dead_letters, config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut run = tokio::spawn(loader.run(shutdown_rx));

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received; draining loader");
            let _ = shutdown_tx.send(true);
            run.await
        }
    };

    match outcome {
        Ok(Ok(metrics)) => {
            let snapshot = metrics.snapshot();
            tracing::info!(
                rows_written = snapshot.rows_written,
                dead_lettered = snapshot.dead_lettered,
                "Loader exited cleanly"
            );
            Ok(())
        }
        Ok(Err(e)) => Err(ApiError::internal_error(format!("Loader failed: {}", e))),
        Err(e) => Err(ApiError::internal_error(format!("Loader task panicked: {}", e))),
    }
}

#[cfg(feature = "kafka")]
fn build_log(config: &LoaderConfig) -> ApiResult<(Arc<dyn LogConsumer>, Arc<dyn LogProducer>)> {
    use beacon_pipeline::{KafkaConsumer, KafkaProducer};

    let consumer = KafkaConsumer::new(&config.brokers, &config.consumer_group, &config.topic)
        .map_err(|e| ApiError::internal_error(format!("Failed to create consumer: {}", e)))?;
    let producer = KafkaProducer::new(&config.brokers, std::time::Duration::from_secs(5))
        .map_err(|e| ApiError::internal_error(format!("Failed to create producer: {}", e)))?;
    Ok((Arc::new(consumer), Arc::new(producer)))
}

#[cfg(not(feature = "kafka"))]
fn build_log(config: &LoaderConfig) -> ApiResult<(Arc<dyn LogConsumer>, Arc<dyn LogProducer>)> {
    tracing::warn!(
        topic = %config.topic,
        "Built without the kafka feature; consuming an empty in-process log"
    );
    let log = beacon_pipeline::MemoryLog::default();
    let consumer = log.consumer(config.consumer_group.clone(), config.topic.clone());
    Ok((Arc::new(consumer), Arc::new(log)))
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
