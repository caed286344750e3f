//! Capture service entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use beacon_api::config::{ApiConfig, CaptureConfig};
use beacon_api::rate_limit::{AdmissionLimiter, InMemoryRateLimitStore, WINDOW_SECS};
use beacon_api::telemetry::{init_tracing, TelemetryConfig};
use beacon_api::{capture_router, ApiError, ApiResult, CaptureState, HttpKeyValidator};
use beacon_pipeline::{EventPublisher, LogProducer};
use chrono::Utc;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::for_service("beacon-capture"))?;

    let api_config = ApiConfig::from_env();
    let config = CaptureConfig::from_env();

    let producer = build_producer(&config)?;
    let publisher = EventPublisher::new(producer, config.events_topic.clone(), config.send_timeout);

    let key_validator = HttpKeyValidator::new(&config.auth_url, config.auth_timeout)
        .map_err(|e| ApiError::internal_error(format!("Failed to build auth client: {}", e)))?;

    let counters = Arc::new(InMemoryRateLimitStore::new());
    tokio::spawn(evict_stale_windows(Arc::clone(&counters)));

    let state = CaptureState::new(config, publisher)
        .with_key_validator(Arc::new(key_validator))
        .with_limiter(AdmissionLimiter::new(counters));
    let app = capture_router(state, &api_config);

    let addr = api_config.capture_addr()?;
    tracing::info!(%addr, "Starting beacon capture service");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

#[cfg(feature = "kafka")]
fn build_producer(config: &CaptureConfig) -> ApiResult<Arc<dyn LogProducer>> {
    let producer = beacon_pipeline::KafkaProducer::new(&config.brokers, config.send_timeout)
        .map_err(|e| ApiError::internal_error(format!("Failed to create producer: {}", e)))?;
    tracing::info!(brokers = %config.brokers, topic = %config.events_topic, "Kafka producer ready");
    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
fn build_producer(config: &CaptureConfig) -> ApiResult<Arc<dyn LogProducer>> {
    tracing::warn!(
        topic = %config.events_topic,
        "Built without the kafka feature; events stay in an in-process log"
    );
    Ok(Arc::new(beacon_pipeline::MemoryLog::default()))
}

/// Drop counters of past windows once a minute.
async fn evict_stale_windows(counters: Arc<InMemoryRateLimitStore>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(WINDOW_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let current_window = Utc::now().timestamp().max(0) as u64 / WINDOW_SECS;
        let evicted = counters.evict_stale(current_window);
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted stale rate limit windows");
        }
    }
}
