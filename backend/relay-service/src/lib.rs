//! Kafka to PostgreSQL relay
//!
//! Two binaries share this library:
//!
//! - `relay-producer` publishes a message and reports the broker acknowledgment
//! - `relay-consumer` reads assigned partitions, stores each message
//!   idempotently and commits the read position only after the row is durable
//!
//! Delivery is at-least-once end to end. Redeliveries after a crash are
//! absorbed by the store's unique `(topic, partition, offset)` key.

pub mod config;
pub mod error;
pub mod kafka;
pub mod logging;
pub mod relay;
pub mod shutdown;

pub use config::{ConfigError, ConsumerConfig, ProducerConfig};
pub use error::{RelayError, Result};
pub use kafka::{Acknowledgment, KafkaRelayConsumer, MessageProducer, SendError};
pub use relay::{
    PartitionReport, PartitionSupervisor, PartitionWorker, ReceivedMessage, WorkerPolicy,
    WorkerState,
};
