use super::{
    ConsumeError, OffsetCommitter, PartitionReport, PartitionWorker, ReceivedMessage, WorkerPolicy,
};
use crate::shutdown::wait_for_shutdown;
use futures::Stream;
use message_store::MessageStore;
use resilience::with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Runs one [`PartitionWorker`] per partition and collects their reports
///
/// Partitions are independent: a failed worker stops only its own partition.
/// After the shutdown signal, workers get `grace` to finish the message in
/// hand; any still running afterwards are aborted without a report.
pub struct PartitionSupervisor {
    topic: String,
    policy: WorkerPolicy,
    grace: Duration,
}

impl PartitionSupervisor {
    pub fn new(topic: impl Into<String>, policy: WorkerPolicy, grace: Duration) -> Self {
        Self {
            topic: topic.into(),
            policy,
            grace,
        }
    }

    /// Spawn a worker per stream and wait for all of them
    ///
    /// `on_finished` sees every report as soon as its worker returns, while
    /// the other partitions keep running. Reports come back sorted by
    /// partition.
    pub async fn run<S, C, St, F>(
        self,
        streams: Vec<(i32, St)>,
        store: Arc<S>,
        committer: Arc<C>,
        shutdown: watch::Receiver<bool>,
        mut on_finished: F,
    ) -> Vec<PartitionReport>
    where
        S: MessageStore + 'static,
        C: OffsetCommitter + 'static,
        St: Stream<Item = Result<ReceivedMessage, ConsumeError>> + Send + 'static,
        F: FnMut(&PartitionReport),
    {
        let mut workers = JoinSet::new();
        for (partition, stream) in streams {
            let worker = PartitionWorker::new(
                self.topic.clone(),
                partition,
                store.clone(),
                committer.clone(),
                self.policy.clone(),
            );
            workers.spawn(worker.run(stream, shutdown.clone()));
        }

        let mut reports = Vec::with_capacity(workers.len());
        let mut shutdown_rx = shutdown;
        tokio::select! {
            _ = collect_reports(&mut workers, &mut reports, &mut on_finished) => {
                info!(topic = %self.topic, "All partition workers finished");
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!(grace = ?self.grace, "Waiting for in-flight messages to finish");
                let drained = with_timeout(
                    self.grace,
                    collect_reports(&mut workers, &mut reports, &mut on_finished),
                )
                .await;
                if drained.is_err() {
                    warn!(
                        remaining = workers.len(),
                        "Shutdown grace period elapsed, aborting partition workers"
                    );
                    workers.abort_all();
                    collect_reports(&mut workers, &mut reports, &mut on_finished).await;
                }
            }
        }

        reports.sort_by_key(|r| r.partition);
        reports
    }
}

async fn collect_reports<F>(
    workers: &mut JoinSet<PartitionReport>,
    reports: &mut Vec<PartitionReport>,
    on_finished: &mut F,
) where
    F: FnMut(&PartitionReport),
{
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(report) => {
                on_finished(&report);
                reports.push(report);
            }
            Err(e) if e.is_cancelled() => {
                warn!("Partition worker aborted before finishing its message")
            }
            Err(e) => error!(error = %e, "Partition worker panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::{fast_policy, msg_on, FakeCommitter, FakeStore};
    use crate::relay::{WorkerError, WorkerState};
    use futures::channel::mpsc;
    use std::cell::Cell;
    use tokio::sync::mpsc as tokio_mpsc;

    fn supervisor(grace: Duration) -> PartitionSupervisor {
        PartitionSupervisor::new("test-topic", fast_policy(), grace)
    }

    async fn wait_for_commit(committer: &FakeCommitter, expected: (i32, i64)) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !committer.commits().contains(&expected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("commit did not happen in time");
    }

    #[tokio::test]
    async fn test_failed_partition_does_not_stop_the_others() {
        let store = Arc::new(FakeStore {
            fatal_partition: Some(1),
            ..Default::default()
        });
        let committer = Arc::new(FakeCommitter::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx0, rx0) = mpsc::unbounded();
        let (tx1, rx1) = mpsc::unbounded();
        let (finished_tx, mut finished_rx) = tokio_mpsc::unbounded_channel();

        let run = tokio::spawn(supervisor(Duration::from_secs(1)).run(
            vec![(0, rx0), (1, rx1)],
            store.clone(),
            committer.clone(),
            shutdown_rx,
            move |report: &PartitionReport| {
                let _ = finished_tx.send((report.partition, report.final_state));
            },
        ));

        tx0.unbounded_send(msg_on(0, 4, "before")).unwrap();
        wait_for_commit(&committer, (0, 5)).await;

        tx1.unbounded_send(msg_on(1, 0, "poison")).unwrap();
        let finished = finished_rx.recv().await.unwrap();
        assert_eq!(finished, (1, WorkerState::Failed));

        // Partition 0 keeps relaying after its neighbour halted
        tx0.unbounded_send(msg_on(0, 5, "after")).unwrap();
        wait_for_commit(&committer, (0, 6)).await;

        shutdown_tx.send(true).unwrap();
        let reports = run.await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].partition, 0);
        assert_eq!(reports[0].final_state, WorkerState::Stopped);
        assert_eq!(reports[0].processed, 2);
        assert_eq!(reports[0].committed, Some(6));
        assert_eq!(reports[1].partition, 1);
        assert!(reports[1].is_failed());
        assert!(matches!(
            reports[1].error,
            Some(WorkerError::Persist { offset: 0, attempts: 1, .. })
        ));
        assert_eq!(committer.commits(), vec![(0, 5), (0, 6)]);
        assert_eq!(finished_rx.recv().await, Some((0, WorkerState::Stopped)));
    }

    #[tokio::test]
    async fn test_stuck_write_is_aborted_after_grace_period() {
        let store = Arc::new(FakeStore {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let committer = Arc::new(FakeCommitter::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::unbounded();
        tx.unbounded_send(msg_on(0, 0, "slow")).unwrap();

        let finished = Cell::new(0);
        let run = supervisor(Duration::from_millis(50)).run(
            vec![(0, rx)],
            store.clone(),
            committer.clone(),
            shutdown_rx,
            |_: &PartitionReport| finished.set(finished.get() + 1),
        );
        tokio::pin!(run);

        // Request shutdown once the write is underway
        let reports = tokio::select! {
            reports = &mut run => reports,
            _ = store.entered.notified() => {
                shutdown_tx.send(true).unwrap();
                tokio::time::timeout(Duration::from_secs(2), &mut run)
                    .await
                    .expect("supervisor should abort the stuck worker")
            }
        };

        assert!(reports.is_empty());
        assert_eq!(finished.get(), 0);
        assert_eq!(store.attempts(), 1);
        assert!(committer.commits().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_reports_are_sorted_when_streams_end() {
        let store = Arc::new(FakeStore::default());
        let committer = Arc::new(FakeCommitter::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let streams = vec![
            (2, futures::stream::iter(vec![msg_on(2, 0, "c")])),
            (0, futures::stream::iter(vec![msg_on(0, 0, "a"), msg_on(0, 1, "b")])),
            (1, futures::stream::iter(vec![])),
        ];
        let reports = supervisor(Duration::from_secs(1))
            .run(streams, store.clone(), committer, shutdown_rx, |_: &PartitionReport| {})
            .await;

        let partitions: Vec<i32> = reports.iter().map(|r| r.partition).collect();
        assert_eq!(partitions, vec![0, 1, 2]);
        assert!(reports.iter().all(|r| r.final_state == WorkerState::Stopped));
        assert_eq!(reports[0].committed, Some(2));
        assert_eq!(reports[1].processed, 0);
        assert_eq!(store.row_count(), 3);
    }
}
