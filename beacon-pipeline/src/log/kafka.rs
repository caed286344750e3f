//! Kafka adapters built on rdkafka.

use std::time::Duration;

use ::async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, error};

use super::{CommitOffset, LogConsumer, LogProducer, LogRecord};
use crate::error::LogError;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

fn connection_error(err: KafkaError) -> LogError {
    LogError::Connection {
        reason: err.to_string(),
    }
}

// ============================================================================
// PRODUCER
// ============================================================================

/// [`LogProducer`] over an rdkafka `FutureProducer`.
pub struct KafkaProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaProducer {
    /// Connect to `brokers` (comma separated). `message_timeout` bounds delivery.
    pub fn new(brokers: &str, message_timeout: Duration) -> Result<Self, LogError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", message_timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(connection_error)?;
        Ok(Self {
            producer,
            queue_timeout: message_timeout,
        })
    }

    /// Wait for in-flight deliveries before shutdown.
    pub fn flush(&self, timeout: Duration) -> Result<(), LogError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(connection_error)
    }
}

#[async_trait]
impl LogProducer for KafkaProducer {
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), LogError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        match self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
        {
            Ok(_) => {
                debug!(topic, "Record delivered");
                Ok(())
            }
            Err((err, _)) => {
                error!(topic, error = %err, "Kafka delivery failed");
                Err(LogError::Produce {
                    topic: topic.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn ping(&self) -> Result<(), LogError> {
        self.producer
            .client()
            .fetch_metadata(None, Timeout::After(METADATA_TIMEOUT))
            .map(|_| ())
            .map_err(connection_error)
    }
}

// ============================================================================
// CONSUMER
// ============================================================================

/// [`LogConsumer`] over an rdkafka `StreamConsumer` with manual commits.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> Result<Self, LogError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(connection_error)?;
        consumer.subscribe(&[topic]).map_err(connection_error)?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl LogConsumer for KafkaConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(err)) => Err(LogError::Consume {
                reason: err.to_string(),
            }),
            Ok(Ok(message)) => Ok(Some(LogRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
        }
    }

    async fn commit(&self, offsets: &[CommitOffset]) -> Result<(), LogError> {
        let mut list = TopicPartitionList::new();
        for offset in offsets {
            list.add_partition_offset(&offset.topic, offset.partition, Offset::Offset(offset.offset))
                .map_err(|e| LogError::Commit {
                    reason: e.to_string(),
                })?;
        }
        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(|e| LogError::Commit {
                reason: e.to_string(),
            })
    }
}
