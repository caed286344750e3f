//! Partitioned log abstraction.
//!
//! Producers append keyed records to a topic; records with the same key land
//! in the same partition and keep their relative order. Consumers belong to a
//! group, read records one at a time and commit offsets explicitly.
//!
//! - [`MemoryLog`]: in-process log for tests and single-node runs
//! - `KafkaProducer` / `KafkaConsumer`: Kafka via rdkafka (`kafka` feature)

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use std::time::Duration;

use ::async_trait::async_trait;

use crate::error::LogError;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaProducer};
pub use memory::{MemoryConsumer, MemoryLog};

/// One record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// The offset to commit once this record has been handled.
    pub fn next_offset(&self) -> CommitOffset {
        CommitOffset {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset + 1,
        }
    }
}

/// Commit position for one partition: the offset of the next record to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Appends keyed records to a topic. Safe for concurrent use.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Resolves once the broker has acknowledged the record.
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), LogError>;

    /// Whether the broker can currently be reached.
    async fn ping(&self) -> Result<(), LogError>;
}

/// Reads records for one consumer group.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Next record, or `None` once `timeout` passes with nothing available.
    async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError>;

    /// Durably record consumer progress.
    async fn commit(&self, offsets: &[CommitOffset]) -> Result<(), LogError>;
}
