use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that stop the relay before or outside partition processing
///
/// Per-message failures are reported per partition through
/// [`crate::relay::WorkerError`] instead.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Partition {partition} of topic '{topic}' cannot be consumed separately")]
    PartitionUnavailable { topic: String, partition: i32 },
}

pub type Result<T> = std::result::Result<T, RelayError>;
