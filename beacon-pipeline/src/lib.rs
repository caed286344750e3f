//! Beacon Pipeline - Broker Boundary
//!
//! Everything between an accepted submission and a stored row:
//!
//! - [`log`]: partitioned log producers/consumers (in-memory, Kafka)
//! - [`producer`]: the capture-side publisher with its send deadline
//! - [`loader`]: the batch loader with retry and dead-lettering
//! - [`dead_letter`]: dead-letter records and the sink that publishes them

pub mod dead_letter;
pub mod error;
pub mod loader;
pub mod log;
pub mod producer;

pub use dead_letter::{DeadLetterKind, DeadLetterRecord, DeadLetterSink};
pub use error::{LoaderError, LogError, PublishError};
pub use loader::{
    FlushOutcome, FlushTrigger, Loader, LoaderConfig, LoaderMetrics, LoaderSnapshot, LoaderState,
};
pub use log::{CommitOffset, LogConsumer, LogProducer, LogRecord, MemoryConsumer, MemoryLog};
pub use producer::EventPublisher;

#[cfg(feature = "kafka")]
pub use log::{KafkaConsumer, KafkaProducer};
