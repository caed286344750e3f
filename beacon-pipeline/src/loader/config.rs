//! Loader configuration.

use std::time::Duration;

pub const DEFAULT_EVENTS_TOPIC: &str = "events";
pub const DEFAULT_DEAD_LETTER_TOPIC: &str = "events_dlq";
pub const DEFAULT_CONSUMER_GROUP: &str = "event-consumers";
pub const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BATCH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_INSERT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 1000;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Configuration for the batch loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Comma-separated broker list (default: localhost:9092)
    pub brokers: String,

    /// Topic carrying canonical events (default: events)
    pub topic: String,

    /// Topic receiving dead-letter records (default: events_dlq)
    pub dead_letter_topic: String,

    /// Consumer group id (default: event-consumers)
    pub consumer_group: String,

    /// Buffered records that force a flush (default: 1000)
    pub batch_size: usize,

    /// Time since the last flush that forces one (default: 5 seconds)
    pub batch_interval: Duration,

    /// How long one poll waits for a record (default: 1 second)
    pub poll_timeout: Duration,

    /// Insert attempts per batch, including the first (default: 3)
    pub insert_retry_attempts: u32,

    /// Backoff before retry `n` is `base * 2^n` (default: 1 second)
    pub retry_backoff_base: Duration,

    /// Upper bound on the shutdown drain (default: 30 seconds)
    pub shutdown_grace: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            brokers: DEFAULT_KAFKA_BROKERS.to_string(),
            topic: DEFAULT_EVENTS_TOPIC.to_string(),
            dead_letter_topic: DEFAULT_DEAD_LETTER_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_interval: Duration::from_secs(DEFAULT_BATCH_INTERVAL_SECS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            insert_retry_attempts: DEFAULT_INSERT_RETRY_ATTEMPTS,
            retry_backoff_base: Duration::from_millis(DEFAULT_RETRY_BACKOFF_BASE_MS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl LoaderConfig {
    /// Create LoaderConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `BEACON_BROKERS`
    /// - `BEACON_EVENTS_TOPIC`
    /// - `BEACON_DLQ_TOPIC`
    /// - `BEACON_CONSUMER_GROUP`
    /// - `BEACON_LOADER_BATCH_SIZE`
    /// - `BEACON_LOADER_BATCH_INTERVAL_SECS`
    /// - `BEACON_LOADER_POLL_TIMEOUT_MS`
    /// - `BEACON_INSERT_RETRY_COUNT`
    /// - `BEACON_INSERT_RETRY_BACKOFF_MS`
    /// - `BEACON_LOADER_SHUTDOWN_GRACE_SECS`
    pub fn from_env() -> Self {
        Self {
            brokers: env_or("BEACON_BROKERS", DEFAULT_KAFKA_BROKERS.to_string()),
            topic: env_or("BEACON_EVENTS_TOPIC", DEFAULT_EVENTS_TOPIC.to_string()),
            dead_letter_topic: env_or("BEACON_DLQ_TOPIC", DEFAULT_DEAD_LETTER_TOPIC.to_string()),
            consumer_group: env_or("BEACON_CONSUMER_GROUP", DEFAULT_CONSUMER_GROUP.to_string()),
            batch_size: env_or("BEACON_LOADER_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            batch_interval: Duration::from_secs(env_or(
                "BEACON_LOADER_BATCH_INTERVAL_SECS",
                DEFAULT_BATCH_INTERVAL_SECS,
            )),
            poll_timeout: Duration::from_millis(env_or(
                "BEACON_LOADER_POLL_TIMEOUT_MS",
                DEFAULT_POLL_TIMEOUT_MS,
            )),
            insert_retry_attempts: env_or("BEACON_INSERT_RETRY_COUNT", DEFAULT_INSERT_RETRY_ATTEMPTS)
                .max(1),
            retry_backoff_base: Duration::from_millis(env_or(
                "BEACON_INSERT_RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BACKOFF_BASE_MS,
            )),
            shutdown_grace: Duration::from_secs(env_or(
                "BEACON_LOADER_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )),
        }
    }

    /// Small batches and short timers for local runs and tests.
    pub fn development() -> Self {
        Self {
            batch_size: 10,
            batch_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(100),
            retry_backoff_base: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}
