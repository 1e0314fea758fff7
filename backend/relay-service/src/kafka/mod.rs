//! Kafka plumbing: ack-gated producer, partition-assigned consumer and
//! error classification

mod classify;
mod consumer;
mod producer;

pub use classify::classify_kafka_error;
pub use consumer::{to_received, KafkaOffsetCommitter, KafkaRelayConsumer};
pub use producer::{validate_topic, Acknowledgment, MessageProducer, SendError};
