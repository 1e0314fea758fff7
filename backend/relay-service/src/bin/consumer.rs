//! Relay consumer - stores every message of the assigned partitions in
//! PostgreSQL, committing each offset only after its row is durable
//!
//! Runs until SIGTERM or Ctrl+C. Exits non-zero if any partition halted on an
//! unrecoverable error.

use anyhow::{Context, Result};
use db_pool::{create_pool, DbConfig};
use message_store::PgMessageStore;
use relay_service::{logging, shutdown, ConsumerConfig, KafkaRelayConsumer};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = ConsumerConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    info!(
        brokers = %config.kafka_brokers,
        topic = %config.kafka_topic,
        partitions = ?config.kafka_partitions,
        group_id = %config.kafka_group_id,
        "Starting relay consumer"
    );

    let db_config = DbConfig::from_env("relay-consumer")
        .map_err(|e| anyhow::anyhow!("Database configuration error: {}", e))?
        .with_min_capacity(config.kafka_partitions.len() as u32);
    db_config.log_config();

    let pool = create_pool(db_config)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if config.relay_run_migrations {
        message_store::migrate(&pool)
            .await
            .context("Failed to run message store migrations")?;
    }

    let store = Arc::new(PgMessageStore::new(pool.clone()));
    let (_shutdown_tx, shutdown_rx) = shutdown::spawn_signal_listener();

    let consumer = KafkaRelayConsumer::new(config).context("Failed to create Kafka consumer")?;
    let reports = consumer.run(store, shutdown_rx).await?;

    pool.close().await;

    let mut failed = 0;
    for report in &reports {
        match &report.error {
            Some(e) => {
                failed += 1;
                error!(
                    partition = report.partition,
                    committed = ?report.committed,
                    error = %e,
                    "Partition halted"
                );
            }
            None => info!(
                partition = report.partition,
                processed = report.processed,
                duplicates = report.duplicates,
                committed = ?report.committed,
                "Partition finished"
            ),
        }
    }

    if failed > 0 {
        anyhow::bail!("{} partition(s) halted on unrecoverable errors", failed);
    }
    if reports.is_empty() {
        warn!("No partition reports collected");
    }

    info!("Relay consumer shut down");
    Ok(())
}
