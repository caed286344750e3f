//! Broker producer adapter.
//!
//! Publishes canonical events to the events topic keyed by subject id, with
//! the whole call bounded by a send deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::KeyedEvent;
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::log::LogProducer;

/// Sends keyed records under a deadline.
#[derive(Clone)]
pub struct EventPublisher {
    producer: Arc<dyn LogProducer>,
    topic: String,
    send_timeout: Duration,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("topic", &self.topic)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    pub fn new(producer: Arc<dyn LogProducer>, topic: impl Into<String>, send_timeout: Duration) -> Self {
        Self {
            producer,
            topic: topic.into(),
            send_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `(key, value)` pairs in order.
    ///
    /// Fails with [`PublishError::Backpressure`] when the deadline expires
    /// before every record is acknowledged. Records acknowledged before the
    /// failure stay published.
    pub async fn publish(&self, records: &[(Vec<u8>, Vec<u8>)]) -> Result<(), PublishError> {
        let started = Instant::now();
        let send_all = async {
            for (key, value) in records {
                self.producer.send(&self.topic, key, value).await?;
            }
            Ok::<(), PublishError>(())
        };

        match tokio::time::timeout(self.send_timeout, send_all).await {
            Ok(result) => {
                result?;
                debug!(
                    topic = %self.topic,
                    count = records.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Published records"
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    topic = %self.topic,
                    count = records.len(),
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Publish deadline exceeded"
                );
                Err(PublishError::Backpressure {
                    timeout_ms: self.send_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Encode canonical events to wire format and publish them.
    pub async fn publish_events(&self, events: &[KeyedEvent]) -> Result<(), PublishError> {
        let records = events
            .iter()
            .map(|keyed| {
                keyed
                    .event
                    .to_wire()
                    .map(|value| (keyed.key.as_bytes().to_vec(), value))
                    .map_err(|e| PublishError::Encode {
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.publish(&records).await
    }

    /// Broker reachability for readiness probes.
    pub async fn ready(&self) -> bool {
        self.producer.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogError;
    use crate::log::MemoryLog;
    use ::async_trait::async_trait;

    struct NeverAcks;

    #[async_trait]
    impl LogProducer for NeverAcks {
        async fn send(&self, _topic: &str, _key: &[u8], _payload: &[u8]) -> Result<(), LogError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn ping(&self) -> Result<(), LogError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_appends_in_order() {
        let log = MemoryLog::new(1);
        let publisher = EventPublisher::new(Arc::new(log.clone()), "events", Duration::from_secs(1));
        publisher
            .publish(&[
                (b"u1".to_vec(), b"first".to_vec()),
                (b"u1".to_vec(), b"second".to_vec()),
            ])
            .await
            .unwrap();
        let payloads: Vec<_> = log.records("events").await.into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_backpressure() {
        let publisher = EventPublisher::new(Arc::new(NeverAcks), "events", Duration::from_millis(250));
        let err = publisher
            .publish(&[(b"k".to_vec(), b"v".to_vec())])
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::Backpressure { timeout_ms: 250 });
    }

    #[tokio::test]
    async fn test_broker_failure_is_distinct_from_backpressure() {
        let log = MemoryLog::default();
        log.set_unavailable(true);
        let publisher = EventPublisher::new(Arc::new(log), "events", Duration::from_secs(1));
        let err = publisher
            .publish(&[(b"k".to_vec(), b"v".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Broker(_)));
        assert!(!publisher.ready().await);
    }
}
