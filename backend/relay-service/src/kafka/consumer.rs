use async_trait::async_trait;
use futures::Stream;
use message_store::MessageStore;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{CommitMode, Consumer, DefaultConsumerContext, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::{ClientConfig, Offset};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ConsumerConfig;
use crate::error::{RelayError, Result};
use crate::relay::{
    CommitError, ConsumeError, OffsetCommitter, PartitionReport, PartitionSupervisor,
    ReceivedMessage,
};
use crate::shutdown::wait_for_shutdown;

type PartitionQueue = StreamPartitionQueue<DefaultConsumerContext>;

/// Copy a broker message out of librdkafka's buffer
///
/// A missing payload (tombstone) becomes an empty one.
pub fn to_received<M: Message>(msg: &M) -> ReceivedMessage {
    ReceivedMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec),
        payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp_ms: msg.timestamp().to_millis(),
    }
}

fn partition_stream(
    queue: PartitionQueue,
) -> impl Stream<Item = std::result::Result<ReceivedMessage, ConsumeError>> + Send {
    futures::stream::unfold(queue, |queue| async move {
        let item = match queue.recv().await {
            Ok(msg) => Ok(to_received(&msg)),
            Err(e) => Err(ConsumeError::Kafka(e)),
        };
        Some((item, queue))
    })
}

/// Commits read positions synchronously through the group coordinator
#[derive(Clone)]
pub struct KafkaOffsetCommitter {
    consumer: Arc<StreamConsumer>,
}

impl KafkaOffsetCommitter {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }

    /// The group's committed position for one partition, if any
    pub async fn committed(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<Option<i64>> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        let consumer = self.consumer.clone();

        let committed =
            tokio::task::spawn_blocking(move || consumer.committed_offsets(tpl, timeout)).await??;

        Ok(committed
            .find_partition(topic, partition)
            .and_then(|elem| match elem.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            }))
    }
}

#[async_trait]
impl OffsetCommitter for KafkaOffsetCommitter {
    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        next_offset: i64,
    ) -> std::result::Result<(), CommitError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset))?;
        let consumer = self.consumer.clone();

        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| CommitError::Interrupted(e.to_string()))??;
        Ok(())
    }
}

/// Manually assigned consumer that runs one partition worker per partition
pub struct KafkaRelayConsumer {
    consumer: Arc<StreamConsumer>,
    queues: Vec<(i32, PartitionQueue)>,
    config: ConsumerConfig,
}

impl KafkaRelayConsumer {
    pub fn new(config: ConsumerConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("group.id", &config.kafka_group_id)
            .set("enable.auto.commit", "false") // commit only after the row is durable
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &config.kafka_auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .create()?;
        let consumer = Arc::new(consumer);

        // Queues must be split off before assignment so no message lands on the main queue
        let mut queues = Vec::with_capacity(config.kafka_partitions.len());
        for &partition in &config.kafka_partitions {
            let queue = consumer
                .split_partition_queue(&config.kafka_topic, partition)
                .ok_or_else(|| RelayError::PartitionUnavailable {
                    topic: config.kafka_topic.clone(),
                    partition,
                })?;
            queues.push((partition, queue));
        }

        let mut tpl = TopicPartitionList::new();
        for &partition in &config.kafka_partitions {
            // Stored = resume from the group's committed position
            tpl.add_partition_offset(&config.kafka_topic, partition, Offset::Stored)?;
        }
        consumer.assign(&tpl)?;

        info!(
            topic = %config.kafka_topic,
            partitions = ?config.kafka_partitions,
            group_id = %config.kafka_group_id,
            "Kafka consumer assigned"
        );

        Ok(Self {
            consumer,
            queues,
            config,
        })
    }

    pub fn committer(&self) -> KafkaOffsetCommitter {
        KafkaOffsetCommitter::new(self.consumer.clone())
    }

    /// Relay every assigned partition into `store` until shutdown
    ///
    /// Returns one report per partition that finished. After the shutdown
    /// signal, workers get the configured grace period to finish the message
    /// in hand; any still running afterwards are aborted and their partitions
    /// resume from the last committed position on the next start. A partition
    /// whose worker fails is paused so the client stops fetching for it.
    pub async fn run<S>(
        self,
        store: Arc<S>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<PartitionReport>>
    where
        S: MessageStore + 'static,
    {
        let committer = Arc::new(self.committer());
        let topic = self.config.kafka_topic.clone();
        let supervisor = PartitionSupervisor::new(
            topic.clone(),
            self.config.worker_policy(),
            self.config.shutdown_grace(),
        );

        let streams: Vec<_> = self
            .queues
            .into_iter()
            .map(|(partition, queue)| (partition, partition_stream(queue)))
            .collect();

        let driver = tokio::spawn(drive_main_queue(self.consumer.clone(), shutdown.clone()));

        let consumer = self.consumer;
        let reports = supervisor
            .run(streams, store, committer, shutdown, |report: &PartitionReport| {
                if !report.is_failed() {
                    return;
                }
                match pause_partition(&consumer, &topic, report.partition) {
                    Ok(()) => info!(partition = report.partition, "Paused failed partition"),
                    Err(e) => warn!(
                        partition = report.partition,
                        error = %e,
                        "Failed to pause partition"
                    ),
                }
            })
            .await;

        driver.abort();
        Ok(reports)
    }
}

/// Stop fetching one partition; its buffered messages are never handed out
fn pause_partition(consumer: &StreamConsumer, topic: &str, partition: i32) -> KafkaResult<()> {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(topic, partition);
    consumer.pause(&tpl)
}

/// Keep the main queue polled so librdkafka serves events and errors
async fn drive_main_queue(consumer: Arc<StreamConsumer>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown) => break,
            received = consumer.recv() => match received {
                Ok(msg) => warn!(
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "Message arrived on main queue for an unassigned partition; ignoring"
                ),
                Err(e) => warn!(error = %e, "Kafka consumer error"),
            },
        }
    }
    debug!("Main queue driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{OwnedMessage, Timestamp};

    fn unreachable_consumer(partitions: &str) -> KafkaRelayConsumer {
        let config = ConsumerConfig::from_vars(vec![
            ("KAFKA_BROKERS".to_string(), "127.0.0.1:1".to_string()),
            ("KAFKA_PARTITIONS".to_string(), partitions.to_string()),
        ])
        .unwrap();
        // Creation, queue split and assignment need no broker round trip
        KafkaRelayConsumer::new(config).expect("consumer")
    }

    #[tokio::test]
    async fn test_each_assigned_partition_gets_its_own_queue() {
        let consumer = unreachable_consumer("0,2");
        let partitions: Vec<i32> = consumer.queues.iter().map(|(p, _)| *p).collect();
        assert_eq!(partitions, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_failed_partition_can_be_paused() {
        let consumer = unreachable_consumer("0,1");
        let topic = consumer.config.kafka_topic.clone();

        pause_partition(&consumer.consumer, &topic, 1).unwrap();

        let assignment = consumer.consumer.assignment().unwrap();
        assert_eq!(assignment.count(), 2);
    }

    #[test]
    fn test_to_received_copies_coordinate_and_body() {
        let owned = OwnedMessage::new(
            Some(b"Hello".to_vec()),
            Some(b"user-1".to_vec()),
            "test-topic".to_string(),
            Timestamp::CreateTime(1_700_000_000_000),
            2,
            41,
            None,
        );

        let msg = to_received(&owned);
        assert_eq!(msg.topic, "test-topic");
        assert_eq!(msg.partition, 2);
        assert_eq!(msg.offset, 41);
        assert_eq!(msg.next_offset(), 42);
        assert_eq!(msg.key.as_deref(), Some(&b"user-1"[..]));
        assert_eq!(msg.payload, b"Hello".to_vec());
        assert_eq!(msg.timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_tombstone_becomes_empty_payload() {
        let owned = OwnedMessage::new(
            None,
            Some(b"gone".to_vec()),
            "test-topic".to_string(),
            Timestamp::NotAvailable,
            0,
            3,
            None,
        );

        let msg = to_received(&owned);
        assert!(msg.payload.is_empty());
        assert_eq!(msg.timestamp_ms, None);
        assert_eq!(msg.as_record().content(), "");
    }
}
