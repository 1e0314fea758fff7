//! Configuration for the relay producer and consumer
//!
//! Both binaries read their settings from the environment (a `.env` file is
//! honoured through `dotenvy` in `main`). Database pool settings are owned by
//! `db-pool` and loaded separately.
use crate::relay::WorkerPolicy;
use resilience::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

/// Upper bound on configured retries; every backoff loop stays finite
const MAX_CONFIGURED_RETRIES: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Producer settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    /// Kafka broker addresses (comma-separated)
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    /// Topic the message is published to
    #[serde(default = "default_kafka_topic")]
    pub kafka_topic: String,

    /// Message body sent when no message argument is given
    #[serde(default = "default_relay_message")]
    pub relay_message: String,

    /// Payloads larger than this are rejected before reaching the broker
    #[serde(default = "default_max_message_bytes")]
    pub relay_max_message_bytes: usize,

    /// How long to wait for the broker's delivery report
    #[serde(default = "default_delivery_timeout_ms")]
    pub relay_delivery_timeout_ms: u64,
}

/// Consumer settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Kafka broker addresses (comma-separated)
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    /// Topic to relay
    #[serde(default = "default_kafka_topic")]
    pub kafka_topic: String,

    /// Partitions of the topic assigned to this consumer
    #[serde(default = "default_kafka_partitions")]
    pub kafka_partitions: Vec<i32>,

    /// Consumer group used for committing read positions
    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,

    /// Where to start when the group has no committed position (`earliest` or `latest`)
    #[serde(default = "default_auto_offset_reset")]
    pub kafka_auto_offset_reset: String,

    /// Retries after the first attempt for store writes, commits and receives
    #[serde(default = "default_max_retries")]
    pub relay_max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub relay_initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub relay_max_backoff_ms: u64,

    /// Deadline for one store write attempt
    #[serde(default = "default_store_timeout_ms")]
    pub relay_store_timeout_ms: u64,

    /// Deadline for one offset commit attempt
    #[serde(default = "default_commit_timeout_ms")]
    pub relay_commit_timeout_ms: u64,

    /// How long in-flight persist+commit may run after a shutdown signal
    #[serde(default = "default_shutdown_grace_secs")]
    pub relay_shutdown_grace_secs: u64,

    /// Apply bundled migrations on startup
    #[serde(default = "default_run_migrations")]
    pub relay_run_migrations: bool,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_kafka_topic() -> String {
    "test-topic".to_string()
}

fn default_kafka_partitions() -> Vec<i32> {
    vec![0]
}

fn default_kafka_group_id() -> String {
    "relay-consumer".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_relay_message() -> String {
    "Hello from Rust Producer!".to_string()
}

fn default_max_message_bytes() -> usize {
    1_000_000 // broker default message.max.bytes
}

fn default_delivery_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

fn default_commit_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_run_migrations() -> bool {
    true
}

fn require_non_empty(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
    }
    Ok(())
}

impl ProducerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Positional CLI arguments: `[message] [topic]`
    pub fn apply_args<I>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        if let Some(message) = args.next() {
            self.relay_message = message;
        }
        if let Some(topic) = args.next() {
            self.kafka_topic = topic;
        }
        if let Some(extra) = args.next() {
            return Err(ConfigError::Invalid(format!(
                "unexpected argument '{}' (usage: relay-producer [message] [topic])",
                extra
            )));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("KAFKA_BROKERS", &self.kafka_brokers)?;
        require_non_empty("KAFKA_TOPIC", &self.kafka_topic)?;
        if self.relay_max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "RELAY_MAX_MESSAGE_BYTES must be positive".to_string(),
            ));
        }
        if self.relay_delivery_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "RELAY_DELIVERY_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_delivery_timeout_ms)
    }
}

impl ConsumerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("KAFKA_BROKERS", &self.kafka_brokers)?;
        require_non_empty("KAFKA_TOPIC", &self.kafka_topic)?;
        require_non_empty("KAFKA_GROUP_ID", &self.kafka_group_id)?;

        if self.kafka_partitions.is_empty() {
            return Err(ConfigError::Invalid(
                "KAFKA_PARTITIONS must list at least one partition".to_string(),
            ));
        }
        if let Some(p) = self.kafka_partitions.iter().find(|p| **p < 0) {
            return Err(ConfigError::Invalid(format!(
                "KAFKA_PARTITIONS contains negative partition {}",
                p
            )));
        }
        let mut sorted = self.kafka_partitions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.kafka_partitions.len() {
            return Err(ConfigError::Invalid(
                "KAFKA_PARTITIONS contains duplicates".to_string(),
            ));
        }

        if !matches!(self.kafka_auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(ConfigError::Invalid(format!(
                "KAFKA_AUTO_OFFSET_RESET must be 'earliest' or 'latest', got '{}'",
                self.kafka_auto_offset_reset
            )));
        }

        if self.relay_max_retries == 0 || self.relay_max_retries > MAX_CONFIGURED_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "RELAY_MAX_RETRIES must be between 1 and {}",
                MAX_CONFIGURED_RETRIES
            )));
        }
        if self.relay_initial_backoff_ms > self.relay_max_backoff_ms {
            return Err(ConfigError::Invalid(
                "RELAY_INITIAL_BACKOFF_MS exceeds RELAY_MAX_BACKOFF_MS".to_string(),
            ));
        }
        if self.relay_store_timeout_ms == 0 || self.relay_commit_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store and commit timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.relay_max_retries,
            initial_backoff: Duration::from_millis(self.relay_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.relay_max_backoff_ms),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Retry and deadline settings for every partition worker
    pub fn worker_policy(&self) -> WorkerPolicy {
        let retry = self.retry_config();
        WorkerPolicy {
            persist_retry: retry.clone(),
            persist_timeout: Duration::from_millis(self.relay_store_timeout_ms),
            commit_retry: retry.clone(),
            commit_timeout: Duration::from_millis(self.relay_commit_timeout_ms),
            receive_retry: retry,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.relay_shutdown_grace_secs)
    }
}
