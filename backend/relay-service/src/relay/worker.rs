use super::{CommitError, ConsumeError, OffsetCommitter, ReceivedMessage};
use crate::shutdown::wait_for_shutdown;
use futures::{Stream, StreamExt};
use message_store::{InsertOutcome, MessageStore, StoreError};
use resilience::{with_retry_classified, with_timeout, Classify, RetryConfig, RetryError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where a partition worker is in its receive → persist → commit cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Receiving,
    Persisting,
    Committing,
    /// Halted on an error it could not recover from; nothing further is read
    Failed,
    /// Left the loop on shutdown or end of stream with everything committed
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Receiving => "receiving",
            WorkerState::Persisting => "persisting",
            WorkerState::Committing => "committing",
            WorkerState::Failed => "failed",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Retry budgets and per-attempt deadlines for one worker
#[derive(Debug, Clone)]
pub struct WorkerPolicy {
    pub persist_retry: RetryConfig,
    pub persist_timeout: Duration,
    pub commit_retry: RetryConfig,
    pub commit_timeout: Duration,
    pub receive_retry: RetryConfig,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("persisting offset {offset} failed after {attempts} attempt(s): {source}")]
    Persist {
        offset: i64,
        attempts: u32,
        source: StoreError,
    },

    #[error("committing offset {offset} failed after {attempts} attempt(s): {source}")]
    Commit {
        offset: i64,
        attempts: u32,
        source: CommitError,
    },

    #[error("receiving failed: {source}")]
    Receive { source: ConsumeError },
}

/// Outcome of one worker run
#[derive(Debug)]
pub struct PartitionReport {
    pub topic: String,
    pub partition: i32,
    pub final_state: WorkerState,
    /// Messages persisted and committed, duplicates included
    pub processed: u64,
    /// Messages the store already held (redeliveries)
    pub duplicates: u64,
    /// Last position committed by this run
    pub committed: Option<i64>,
    pub error: Option<WorkerError>,
}

impl PartitionReport {
    pub fn is_failed(&self) -> bool {
        self.final_state == WorkerState::Failed
    }
}

/// Sequential processor for a single partition
pub struct PartitionWorker<S: ?Sized, C: ?Sized> {
    topic: String,
    partition: i32,
    store: Arc<S>,
    committer: Arc<C>,
    policy: WorkerPolicy,
    state: WorkerState,
    processed: u64,
    duplicates: u64,
    committed: Option<i64>,
}

impl<S, C> PartitionWorker<S, C>
where
    S: MessageStore + ?Sized,
    C: OffsetCommitter + ?Sized,
{
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        store: Arc<S>,
        committer: Arc<C>,
        policy: WorkerPolicy,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            store,
            committer,
            policy,
            state: WorkerState::Idle,
            processed: 0,
            duplicates: 0,
            committed: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(
            partition = self.partition,
            from = %self.state,
            to = %next,
            "Worker state change"
        );
        self.state = next;
    }

    /// Drive the partition until shutdown, end of stream, or an unrecoverable error.
    ///
    /// Shutdown is only observed between messages: a message already received
    /// is persisted and committed before the worker stops.
    pub async fn run<St>(mut self, stream: St, mut shutdown: watch::Receiver<bool>) -> PartitionReport
    where
        St: Stream<Item = Result<ReceivedMessage, ConsumeError>>,
    {
        tokio::pin!(stream);
        info!(topic = %self.topic, partition = self.partition, "Partition worker started");

        let mut receive_failures: u32 = 0;

        let error = loop {
            self.transition(WorkerState::Receiving);

            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(partition = self.partition, "Shutdown requested, stopping partition worker");
                    break None;
                }
                next = stream.next() => next,
            };

            let msg = match next {
                Some(Ok(msg)) => {
                    receive_failures = 0;
                    msg
                }
                Some(Err(e)) => {
                    receive_failures += 1;
                    let budget = self.policy.receive_retry.max_retries;
                    if !e.is_transient() || receive_failures > budget {
                        break Some(WorkerError::Receive { source: e });
                    }

                    let delay = self.policy.receive_retry.backoff_for(receive_failures);
                    warn!(
                        partition = self.partition,
                        error = %e,
                        "Receive failed, retry {}/{} in {:?}",
                        receive_failures,
                        budget,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = wait_for_shutdown(&mut shutdown) => break None,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
                None => {
                    info!(partition = self.partition, "Partition stream ended");
                    break None;
                }
            };

            if let Err(e) = self.handle(&msg).await {
                break Some(e);
            }
        };

        match &error {
            Some(e) => {
                self.transition(WorkerState::Failed);
                error!(
                    topic = %self.topic,
                    partition = self.partition,
                    committed = ?self.committed,
                    error = %e,
                    "Partition worker halted; later messages stay uncommitted"
                );
            }
            None => {
                self.transition(WorkerState::Stopped);
                info!(
                    topic = %self.topic,
                    partition = self.partition,
                    processed = self.processed,
                    duplicates = self.duplicates,
                    "Partition worker stopped"
                );
            }
        }

        PartitionReport {
            topic: self.topic,
            partition: self.partition,
            final_state: self.state,
            processed: self.processed,
            duplicates: self.duplicates,
            committed: self.committed,
            error,
        }
    }

    /// Persist then commit one message
    async fn handle(&mut self, msg: &ReceivedMessage) -> Result<(), WorkerError> {
        info!(
            partition = msg.partition,
            offset = msg.offset,
            payload = %msg.preview(),
            "Received message"
        );

        self.transition(WorkerState::Persisting);
        let outcome = self.persist(msg).await?;
        if outcome.is_duplicate() {
            self.duplicates += 1;
            info!(
                partition = msg.partition,
                offset = msg.offset,
                record_id = outcome.record_id(),
                "Message already stored, committing past it"
            );
        }

        self.transition(WorkerState::Committing);
        let next_offset = msg.next_offset();
        self.commit(next_offset).await?;

        self.processed += 1;
        self.committed = Some(next_offset);
        debug!(
            partition = msg.partition,
            committed = next_offset,
            "Offset committed"
        );

        self.transition(WorkerState::Idle);
        Ok(())
    }

    async fn persist(&self, msg: &ReceivedMessage) -> Result<InsertOutcome, WorkerError> {
        let store = &*self.store;
        let record = msg.as_record();
        let deadline = self.policy.persist_timeout;
        let mut attempts: u32 = 0;

        let result = with_retry_classified(self.policy.persist_retry.clone(), || {
            attempts += 1;
            async move {
                match with_timeout(deadline, store.insert_if_absent(record)).await {
                    Ok(outcome) => outcome,
                    Err(elapsed) => Err(StoreError::Timeout(elapsed)),
                }
            }
        })
        .await;

        result.map_err(|e| WorkerError::Persist {
            offset: msg.offset,
            attempts,
            source: unwrap_retry(e),
        })
    }

    async fn commit(&self, next_offset: i64) -> Result<(), WorkerError> {
        let committer = &*self.committer;
        let topic = self.topic.as_str();
        let partition = self.partition;
        let deadline = self.policy.commit_timeout;
        let mut attempts: u32 = 0;

        let result = with_retry_classified(self.policy.commit_retry.clone(), || {
            attempts += 1;
            async move {
                match with_timeout(deadline, committer.commit(topic, partition, next_offset)).await
                {
                    Ok(result) => result,
                    Err(elapsed) => Err(CommitError::Timeout(elapsed)),
                }
            }
        })
        .await;

        result.map_err(|e| WorkerError::Commit {
            offset: next_offset - 1,
            attempts,
            source: unwrap_retry(e),
        })
    }
}

fn unwrap_retry<E: Classify + fmt::Display>(err: RetryError<E>) -> E {
    if err.is_exhausted() {
        warn!(error = %err.inner(), "Retry budget exhausted");
    } else {
        warn!(class = %err.inner().class(), error = %err.inner(), "Non-retryable failure");
    }
    err.into_inner()
}
