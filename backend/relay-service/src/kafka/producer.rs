use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use resilience::{with_timeout, Classify, ErrorClass};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::classify_kafka_error;
use crate::config::ProducerConfig;

/// Longest topic name Kafka accepts
const MAX_TOPIC_LEN: usize = 249;

/// Broker confirmation that a message is durably appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Error)]
pub enum SendError {
    /// Rejected before reaching the broker, or rejected by it as malformed
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// No acknowledgment; sending again may succeed
    #[error("Transient send failure: {0}")]
    Transient(String),

    #[error("Send failed: {0}")]
    Fatal(String),
}

impl SendError {
    pub fn from_kafka(err: KafkaError) -> Self {
        if err.rdkafka_error_code() == Some(RDKafkaErrorCode::MessageSizeTooLarge) {
            return SendError::InvalidMessage(err.to_string());
        }
        match classify_kafka_error(&err) {
            ErrorClass::Transient => SendError::Transient(err.to_string()),
            _ => SendError::Fatal(err.to_string()),
        }
    }
}

impl Classify for SendError {
    fn class(&self) -> ErrorClass {
        match self {
            SendError::Transient(_) => ErrorClass::Transient,
            SendError::InvalidMessage(_) | SendError::Fatal(_) => ErrorClass::Fatal,
        }
    }
}

/// Ack-gated Kafka producer
///
/// Runs with `acks=all` and idempotence enabled, so a returned
/// [`Acknowledgment`] means every in-sync replica has the message.
#[derive(Clone)]
pub struct MessageProducer {
    producer: FutureProducer,
    delivery_timeout: Duration,
    max_message_bytes: usize,
}

impl MessageProducer {
    pub fn new(config: &ProducerConfig) -> KafkaResult<Self> {
        let delivery_timeout = config.delivery_timeout();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .create()?;

        info!(brokers = %config.kafka_brokers, "Kafka producer created");

        Ok(Self {
            producer,
            delivery_timeout,
            max_message_bytes: config.relay_max_message_bytes,
        })
    }

    /// Send an unkeyed message and wait for the broker's acknowledgment
    pub async fn send(&self, topic: &str, payload: &[u8]) -> Result<Acknowledgment, SendError> {
        self.send_keyed(topic, None, payload).await
    }

    /// Send a message with an optional partitioning key
    ///
    /// Consecutive acknowledged sends from one producer to the same partition
    /// carry strictly increasing offsets.
    pub async fn send_keyed(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<Acknowledgment, SendError> {
        validate_topic(topic)?;
        if payload.len() > self.max_message_bytes {
            return Err(SendError::InvalidMessage(format!(
                "payload is {} bytes (max {})",
                payload.len(),
                self.max_message_bytes
            )));
        }

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        debug!(topic = %topic, bytes = payload.len(), "Publishing message");

        // librdkafka reports within message.timeout.ms; the outer deadline only
        // covers a report that never arrives
        let delivery = with_timeout(
            self.delivery_timeout * 2,
            self.producer.send(record, self.delivery_timeout),
        )
        .await;

        match delivery {
            Ok(Ok((partition, offset))) => {
                debug!(topic = %topic, partition, offset, "Message acknowledged");
                Ok(Acknowledgment {
                    topic: topic.to_string(),
                    partition,
                    offset,
                })
            }
            Ok(Err((e, _message))) => {
                warn!(topic = %topic, error = %e, "Kafka delivery failed");
                Err(SendError::from_kafka(e))
            }
            Err(elapsed) => {
                warn!(topic = %topic, "Kafka delivery report not received: {}", elapsed);
                Err(SendError::Transient(format!(
                    "no delivery report for topic {}: {}",
                    topic, elapsed
                )))
            }
        }
    }

    /// Fetch metadata for `topic` to confirm the cluster is reachable
    pub async fn health_check(&self, topic: &str) -> Result<(), SendError> {
        let producer = self.producer.clone();
        let topic = topic.to_string();
        let timeout = self.delivery_timeout;

        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(Some(topic.as_str()), timeout)
                .map(|_| ())
        })
        .await
        .map_err(|e| SendError::Fatal(format!("metadata task failed: {}", e)))?
        .map_err(SendError::from_kafka)
    }

    /// Wait for queued messages to be delivered
    pub async fn flush(&self, timeout: Duration) -> Result<(), SendError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| SendError::Fatal(format!("flush task failed: {}", e)))?
            .map_err(SendError::from_kafka)
    }
}

/// Reject names the broker would refuse: empty, too long, or outside `[A-Za-z0-9._-]`
pub fn validate_topic(topic: &str) -> Result<(), SendError> {
    if topic.is_empty() {
        return Err(SendError::InvalidMessage("topic is empty".to_string()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(SendError::InvalidMessage(format!(
            "topic is {} characters (max {})",
            topic.len(),
            MAX_TOPIC_LEN
        )));
    }
    if topic == "." || topic == ".." {
        return Err(SendError::InvalidMessage(format!(
            "topic '{}' is reserved",
            topic
        )));
    }
    if let Some(c) = topic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(SendError::InvalidMessage(format!(
            "topic '{}' contains illegal character '{}'",
            topic, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer_for(brokers: &str, max_message_bytes: usize, timeout_ms: u64) -> MessageProducer {
        let config = ProducerConfig {
            kafka_brokers: brokers.to_string(),
            kafka_topic: "test-topic".to_string(),
            relay_message: "Hello".to_string(),
            relay_max_message_bytes: max_message_bytes,
            relay_delivery_timeout_ms: timeout_ms,
        };
        MessageProducer::new(&config).expect("client creation does not contact the broker")
    }

    fn producer(max_message_bytes: usize) -> MessageProducer {
        producer_for("localhost:9092", max_message_bytes, 1_000)
    }

    /// Nothing listens on port 1, so no ack can ever arrive
    fn unreachable_producer() -> MessageProducer {
        producer_for("127.0.0.1:1", 1_000, 200)
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("test-topic").is_ok());
        assert!(validate_topic("orders.v2_raw").is_ok());
        assert!(validate_topic(&"t".repeat(249)).is_ok());

        for bad in ["", ".", "..", "has space", "slash/topic", "ünïcode"] {
            assert!(
                matches!(validate_topic(bad), Err(SendError::InvalidMessage(_))),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(validate_topic(&"t".repeat(250)).is_err());
    }

    #[tokio::test]
    async fn test_invalid_topic_rejected_without_broker() {
        let result = producer(1_000).send("bad topic!", b"Hello").await;
        assert!(matches!(result, Err(SendError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_without_broker() {
        let payload = vec![0u8; 1_001];
        let result = producer(1_000).send("test-topic", &payload).await;
        match result {
            Err(e @ SendError::InvalidMessage(_)) => assert!(!e.is_transient()),
            other => panic!("expected InvalidMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_send_error_from_kafka() {
        assert!(matches!(
            SendError::from_kafka(KafkaError::MessageProduction(
                RDKafkaErrorCode::MessageTimedOut
            )),
            SendError::Transient(_)
        ));
        assert!(matches!(
            SendError::from_kafka(KafkaError::MessageProduction(
                RDKafkaErrorCode::MessageSizeTooLarge
            )),
            SendError::InvalidMessage(_)
        ));
        assert!(matches!(
            SendError::from_kafka(KafkaError::MessageProduction(
                RDKafkaErrorCode::TopicAuthorizationFailed
            )),
            SendError::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn test_unacknowledged_send_is_transient() {
        let producer = unreachable_producer();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            producer.send("test-topic", b"Hello"),
        )
        .await
        .expect("send must give up within its delivery deadline");

        match result {
            Err(e @ SendError::Transient(_)) => assert!(e.is_transient()),
            other => panic!("expected Transient, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_check_fails_without_broker() {
        let result = unreachable_producer().health_check("test-topic").await;
        assert!(result.is_err());
    }
}
