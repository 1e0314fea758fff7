//! Commit-after-persist relay from one Kafka partition into the message store
//!
//! A [`PartitionWorker`] owns exactly one partition. It takes the next message,
//! writes it through [`message_store::MessageStore::insert_if_absent`] and only
//! then commits `offset + 1` through an [`OffsetCommitter`]. A crash anywhere
//! between the two steps leads to a redelivery that the store absorbs as a
//! duplicate. A [`PartitionSupervisor`] runs the workers of all assigned
//! partitions side by side.

mod supervisor;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

pub use supervisor::PartitionSupervisor;
pub use worker::{PartitionReport, PartitionWorker, WorkerError, WorkerPolicy, WorkerState};

use async_trait::async_trait;
use message_store::NewRecord;
use rdkafka::error::KafkaError;
use resilience::{Classify, ErrorClass, TimeoutError};
use thiserror::Error;

use crate::kafka::classify_kafka_error;

/// Longest payload prefix that ends up in log lines
const PREVIEW_CHARS: usize = 64;

/// A message taken from a partition, owned so it outlives the broker buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// Empty for tombstones
    pub payload: Vec<u8>,
    pub timestamp_ms: Option<i64>,
}

impl ReceivedMessage {
    pub fn as_record(&self) -> NewRecord<'_> {
        NewRecord::new(&self.topic, self.partition, self.offset, &self.payload)
            .with_key(self.key.as_deref())
    }

    /// Position to commit once this message is durable
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }

    /// Short lossy rendering of the payload for logs
    pub fn preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        if text.chars().count() <= PREVIEW_CHARS {
            text.into_owned()
        } else {
            let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
            cut.push_str("...");
            cut
        }
    }
}

/// Failure while reading from a partition
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("Kafka receive failed: {0}")]
    Kafka(#[from] KafkaError),
}

impl Classify for ConsumeError {
    fn class(&self) -> ErrorClass {
        match self {
            ConsumeError::Kafka(e) => classify_kafka_error(e),
        }
    }
}

/// Failure while committing a read position
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Kafka commit failed: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Offset commit timed out: {0}")]
    Timeout(#[from] TimeoutError),

    /// The blocking commit task was cancelled or panicked
    #[error("Offset commit interrupted: {0}")]
    Interrupted(String),
}

impl Classify for CommitError {
    fn class(&self) -> ErrorClass {
        match self {
            CommitError::Kafka(e) => classify_kafka_error(e),
            CommitError::Timeout(_) => ErrorClass::Transient,
            CommitError::Interrupted(_) => ErrorClass::Fatal,
        }
    }
}

/// Records the consumer group's read position for one partition
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Commit `next_offset`, the offset of the next message to read
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64)
        -> Result<(), CommitError>;
}
