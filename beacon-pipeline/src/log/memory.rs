//! In-process partitioned log.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{CommitOffset, LogConsumer, LogProducer, LogRecord};
use crate::error::LogError;

#[derive(Debug, Clone)]
struct Entry {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct LogState {
    /// topic -> partitions -> entries; offset is the index.
    topics: HashMap<String, Vec<Vec<Entry>>>,
    /// (group, topic, partition) -> next offset to read.
    committed: HashMap<(String, String, i32), i64>,
}

/// A partitioned log held in memory.
///
/// Cloning shares the same log. Records are routed by a hash of the key.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    partitions: usize,
    state: Mutex<LogState>,
    appended: Notify,
    unavailable: AtomicBool,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(4)
    }
}

impl MemoryLog {
    pub fn new(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(LogState::default()),
                appended: Notify::new(),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    pub fn partitions(&self) -> usize {
        self.inner.partitions
    }

    /// Simulate losing (or regaining) the broker.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn partition_for(&self, key: &[u8]) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.inner.partitions as u64) as i32
    }

    /// New consumer for `group` reading `topic` from the group's committed offsets.
    pub fn consumer(&self, group: impl Into<String>, topic: impl Into<String>) -> MemoryConsumer {
        MemoryConsumer {
            log: self.clone(),
            group: group.into(),
            topic: topic.into(),
            cursor: Mutex::new(None),
        }
    }

    /// Every record in `topic`, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<LogRecord> {
        let state = self.inner.state.lock().await;
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, entries)| {
                entries.iter().enumerate().map(move |(offset, entry)| LogRecord {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: offset as i64,
                    key: entry.key.clone(),
                    payload: entry.payload.clone(),
                })
            })
            .collect()
    }

    /// Committed next-offset for a group's partition.
    pub async fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.inner.state.lock().await;
        state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    fn check_available(&self) -> Result<(), LogError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            Err(LogError::Connection {
                reason: "in-memory broker marked unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LogProducer for MemoryLog {
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<(), LogError> {
        self.check_available()?;
        let partition = self.partition_for(key) as usize;
        {
            let mut state = self.inner.state.lock().await;
            let partitions = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.inner.partitions]);
            partitions[partition].push(Entry {
                key: Some(key.to_vec()),
                payload: payload.to_vec(),
            });
        }
        self.inner.appended.notify_waiters();
        Ok(())
    }

    async fn ping(&self) -> Result<(), LogError> {
        self.check_available()
    }
}

/// Read positions per partition, seeded from committed offsets on first poll.
#[derive(Debug)]
struct Cursor {
    positions: Vec<i64>,
    next_partition: usize,
}

/// Consumer-group member over a [`MemoryLog`] topic.
#[derive(Debug)]
pub struct MemoryConsumer {
    log: MemoryLog,
    group: String,
    topic: String,
    cursor: Mutex<Option<Cursor>>,
}

impl MemoryConsumer {
    async fn try_next(&self) -> Option<LogRecord> {
        let state = self.log.inner.state.lock().await;
        let mut cursor_guard = self.cursor.lock().await;
        let partitions = self.log.inner.partitions;
        let cursor = cursor_guard.get_or_insert_with(|| Cursor {
            positions: (0..partitions)
                .map(|p| {
                    state
                        .committed
                        .get(&(self.group.clone(), self.topic.clone(), p as i32))
                        .copied()
                        .unwrap_or(0)
                })
                .collect(),
            next_partition: 0,
        });

        let entries = state.topics.get(&self.topic)?;
        for step in 0..partitions {
            let partition = (cursor.next_partition + step) % partitions;
            let position = cursor.positions[partition];
            if let Some(entry) = entries[partition].get(position as usize) {
                cursor.positions[partition] += 1;
                cursor.next_partition = (partition + 1) % partitions;
                return Some(LogRecord {
                    topic: self.topic.clone(),
                    partition: partition as i32,
                    offset: position,
                    key: entry.key.clone(),
                    payload: entry.payload.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn poll(&self, timeout: Duration) -> Result<Option<LogRecord>, LogError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.log.check_available()?;
            let appended = self.log.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(record) = self.try_next().await {
                return Ok(Some(record));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&self, offsets: &[CommitOffset]) -> Result<(), LogError> {
        self.log.check_available()?;
        let mut state = self.log.inner.state.lock().await;
        for offset in offsets {
            let slot = state
                .committed
                .entry((self.group.clone(), offset.topic.clone(), offset.partition))
                .or_insert(0);
            *slot = (*slot).max(offset.offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let log = MemoryLog::new(8);
        for i in 0..5 {
            log.send("events", b"u1", format!("{}", i).as_bytes())
                .await
                .unwrap();
        }
        let records = log.records("events").await;
        assert_eq!(records.len(), 5);
        let partition = records[0].partition;
        assert!(records.iter().all(|r| r.partition == partition));
        let payloads: Vec<String> = records
            .iter()
            .map(|r| String::from_utf8(r.payload.clone()).unwrap())
            .collect();
        assert_eq!(payloads, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_when_empty() {
        let log = MemoryLog::new(2);
        let consumer = log.consumer("g", "events");
        let polled = consumer.poll(Duration::from_secs(1)).await.unwrap();
        assert!(polled.is_none());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let log = MemoryLog::new(2);
        let consumer = log.consumer("g", "events");
        let producer = log.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send("events", b"k", b"v").await.unwrap();
        });
        let record = consumer.poll(Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(record.map(|r| r.payload), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_new_consumer_resumes_from_commit() {
        let log = MemoryLog::new(1);
        for payload in [b"a", b"b", b"c"] {
            log.send("events", b"k", payload).await.unwrap();
        }
        let first = log.consumer("g", "events");
        let record = first.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        first.commit(&[record.next_offset()]).await.unwrap();
        assert_eq!(log.committed("g", "events", 0).await, Some(1));

        let second = log.consumer("g", "events");
        let record = second.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(record.payload, b"b".to_vec());
    }

    #[tokio::test]
    async fn test_unavailable_broker_fails_send() {
        let log = MemoryLog::default();
        log.set_unavailable(true);
        assert!(matches!(
            log.send("events", b"k", b"v").await,
            Err(LogError::Connection { .. })
        ));
        assert!(log.ping().await.is_err());
    }
}
