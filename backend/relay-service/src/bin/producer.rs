//! Relay producer - publishes one message and waits for the broker ack
//!
//! Usage: `relay-producer [message] [topic]`
//!
//! Defaults come from `RELAY_MESSAGE` and `KAFKA_TOPIC`. Exits non-zero when
//! the broker does not acknowledge the message.

use anyhow::{Context, Result};
use relay_service::{logging, MessageProducer, ProducerConfig};
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = ProducerConfig::from_env()
        .and_then(|c| c.apply_args(std::env::args().skip(1)))
        .map_err(|e| {
            error!("Failed to load configuration: {}", e);
            anyhow::anyhow!("Configuration error: {}", e)
        })?;

    info!(
        brokers = %config.kafka_brokers,
        topic = %config.kafka_topic,
        "Starting relay producer"
    );

    let producer = MessageProducer::new(&config).context("Failed to create Kafka producer")?;

    if let Err(e) = producer.health_check(&config.kafka_topic).await {
        error!(error = %e, "Kafka cluster is not reachable");
        return Err(e).context("Kafka health check failed");
    }

    let ack = producer
        .send(&config.kafka_topic, config.relay_message.as_bytes())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to send message");
            e
        })
        .context("Message was not acknowledged")?;

    info!(
        topic = %ack.topic,
        partition = ack.partition,
        offset = ack.offset,
        "Message sent successfully"
    );

    producer
        .flush(Duration::from_secs(5))
        .await
        .context("Failed to flush producer")?;

    Ok(())
}
