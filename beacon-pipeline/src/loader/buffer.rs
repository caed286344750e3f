//! Pending rows and the log positions they represent.

use std::collections::BTreeMap;

use beacon_core::EventRow;

use crate::log::{CommitOffset, LogRecord};

/// One buffered record: the raw payload for dead-lettering and its row.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedRecord {
    pub raw: Vec<u8>,
    pub row: EventRow,
}

/// Records awaiting a store write, in arrival order.
///
/// Offsets are tracked per partition as the next position to read, so a
/// commit after the flush covers every record the buffer has seen.
#[derive(Debug, Default)]
pub struct LoaderBuffer {
    records: Vec<BufferedRecord>,
    offsets: BTreeMap<(String, i32), i64>,
}

/// A drained buffer.
#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<BufferedRecord>,
    pub offsets: Vec<CommitOffset>,
}

impl Batch {
    pub fn rows(&self) -> Vec<EventRow> {
        self.records.iter().map(|r| r.row.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl LoaderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &LogRecord, row: EventRow) {
        self.advance(record.next_offset());
        self.records.push(BufferedRecord {
            raw: record.payload.clone(),
            row,
        });
    }

    /// Fold a position into the next commit without buffering a row.
    pub fn advance(&mut self, offset: CommitOffset) {
        let slot = self
            .offsets
            .entry((offset.topic, offset.partition))
            .or_insert(offset.offset);
        *slot = (*slot).max(offset.offset);
    }

    /// Whether an uncommitted buffered record came from this partition.
    pub fn holds_partition(&self, topic: &str, partition: i32) -> bool {
        self.offsets.contains_key(&(topic.to_string(), partition))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drain records and offsets, leaving the buffer empty.
    pub fn take(&mut self) -> Batch {
        let offsets = std::mem::take(&mut self.offsets)
            .into_iter()
            .map(|((topic, partition), offset)| CommitOffset {
                topic,
                partition,
                offset,
            })
            .collect();
        Batch {
            records: std::mem::take(&mut self.records),
            offsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::EventRow;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(partition: i32, offset: i64) -> LogRecord {
        LogRecord {
            topic: "events".to_string(),
            partition,
            offset,
            key: None,
            payload: format!("{{\"n\":{}}}", offset).into_bytes(),
        }
    }

    fn row() -> EventRow {
        EventRow {
            timestamp: Utc::now(),
            uuid: Uuid::nil(),
            event: "e".to_string(),
            distinct_id: "u".to_string(),
            project_id: "default".to_string(),
            properties: "{}".to_string(),
            lib: None,
            lib_version: None,
            device_id: None,
        }
    }

    #[test]
    fn test_take_reports_highest_offset_per_partition() {
        let mut buffer = LoaderBuffer::new();
        buffer.push(&record(0, 4), row());
        buffer.push(&record(1, 9), row());
        buffer.push(&record(0, 5), row());
        assert_eq!(buffer.len(), 3);
        assert!(buffer.holds_partition("events", 1));
        assert!(!buffer.holds_partition("events", 2));

        let batch = buffer.take();
        assert!(buffer.is_empty());
        assert!(!buffer.holds_partition("events", 0));
        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.offsets,
            vec![
                CommitOffset { topic: "events".to_string(), partition: 0, offset: 6 },
                CommitOffset { topic: "events".to_string(), partition: 1, offset: 10 },
            ]
        );
    }

    #[test]
    fn test_advance_folds_skipped_position() {
        let mut buffer = LoaderBuffer::new();
        buffer.push(&record(0, 1), row());
        buffer.advance(record(0, 2).next_offset());
        let batch = buffer.take();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.offsets[0].offset, 3);
    }
}
