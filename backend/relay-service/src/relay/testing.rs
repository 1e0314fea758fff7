//! In-memory store and committer for driving workers without Kafka or PostgreSQL

use super::{CommitError, ConsumeError, OffsetCommitter, ReceivedMessage, WorkerPolicy};
use async_trait::async_trait;
use message_store::{InsertOutcome, MessageStore, NewRecord, StoreError, StoreResult};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use resilience::RetryConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub(crate) struct FakeStore {
    pub rows: Mutex<HashMap<(String, i32, i64), i64>>,
    pub failures: Mutex<VecDeque<StoreError>>,
    pub unreachable: bool,
    /// Every write for this partition is rejected as invalid
    pub fatal_partition: Option<i32>,
    pub delay: Option<Duration>,
    pub entered: Notify,
    pub attempts: Mutex<u32>,
    pub log: Log,
}

impl FakeStore {
    pub fn with_log(log: Log) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn fail_with(self, errors: Vec<StoreError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    pub fn seed(&self, topic: &str, partition: i32, offset: i64) {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() as i64 + 1;
        rows.insert((topic.to_string(), partition, offset), id);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn insert_if_absent(&self, record: NewRecord<'_>) -> StoreResult<InsertOutcome> {
        *self.attempts.lock().unwrap() += 1;
        self.entered.notify_one();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        if self.fatal_partition == Some(record.partition) {
            return Err(StoreError::InvalidRecord("rejected".into()));
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let key = (record.topic.to_string(), record.partition, record.offset);
        let mut rows = self.rows.lock().unwrap();
        let outcome = match rows.get(&key) {
            Some(id) => InsertOutcome::Duplicate(*id),
            None => {
                let id = rows.len() as i64 + 1;
                rows.insert(key, id);
                InsertOutcome::Inserted(id)
            }
        };
        self.log
            .lock()
            .unwrap()
            .push(format!("persist {}", record.offset));
        Ok(outcome)
    }
}

#[derive(Default)]
pub(crate) struct FakeCommitter {
    pub failures: Mutex<VecDeque<CommitError>>,
    pub commits: Mutex<Vec<(i32, i64)>>,
    pub log: Log,
}

impl FakeCommitter {
    pub fn with_log(log: Log) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn fail_with(self, errors: Vec<CommitError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    pub fn commits(&self) -> Vec<(i32, i64)> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl OffsetCommitter for FakeCommitter {
    async fn commit(
        &self,
        _topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> Result<(), CommitError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.commits.lock().unwrap().push((partition, next_offset));
        self.log
            .lock()
            .unwrap()
            .push(format!("commit {}", next_offset));
        Ok(())
    }
}

pub(crate) fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

pub(crate) fn fast_policy() -> WorkerPolicy {
    WorkerPolicy {
        persist_retry: fast_retry(3),
        persist_timeout: Duration::from_secs(1),
        commit_retry: fast_retry(2),
        commit_timeout: Duration::from_secs(1),
        receive_retry: fast_retry(2),
    }
}

pub(crate) fn msg_on(
    partition: i32,
    offset: i64,
    payload: &str,
) -> Result<ReceivedMessage, ConsumeError> {
    Ok(ReceivedMessage {
        topic: "test-topic".to_string(),
        partition,
        offset,
        key: None,
        payload: payload.as_bytes().to_vec(),
        timestamp_ms: Some(1_700_000_000_000),
    })
}

pub(crate) fn msg(offset: i64, payload: &str) -> Result<ReceivedMessage, ConsumeError> {
    msg_on(0, offset, payload)
}

pub(crate) fn receive_error(code: RDKafkaErrorCode) -> Result<ReceivedMessage, ConsumeError> {
    Err(ConsumeError::Kafka(KafkaError::MessageConsumption(code)))
}
