//! # Message Store
//!
//! Durable, idempotent persistence for messages relayed from Kafka into
//! PostgreSQL. Every record is keyed by the broker coordinate it came from,
//! `(topic, partition, offset)`, and a unique constraint on that key makes the
//! write safe to repeat.
//!
//! ## Why idempotent
//!
//! The relay consumer commits its read position only after a row is durable.
//! If the process dies between the insert and the commit, the broker
//! redelivers the message on restart. With at-least-once delivery the store has
//! to absorb that redelivery:
//!
//! - **First delivery**: row inserted, [`InsertOutcome::Inserted`] with the new id
//! - **Redelivery**: nothing inserted, [`InsertOutcome::Duplicate`] with the
//!   id of the row already there
//!
//! ## Architecture
//!
//! ```text
//! Kafka → PartitionWorker → MessageStore::insert_if_absent → PostgreSQL
//!                                   ↓                      (messages table,
//!                          Inserted(id) | Duplicate(id)     UNIQUE topic/partition/offset)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use message_store::{MessageStore, NewRecord, PgMessageStore};
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! message_store::migrate(&pool).await?;
//! let store = PgMessageStore::new(pool);
//!
//! let outcome = store
//!     .insert_if_absent(NewRecord::new("test-topic", 0, 42, b"Hello"))
//!     .await?;
//! println!("stored as row {}", outcome.record_id());
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Safety
//!
//! `PgMessageStore` is `Clone` and shares one `PgPool`. Partition workers write
//! concurrently through independent pooled connections; two writers racing on
//! the same key both succeed, one with `Inserted`, the other with `Duplicate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

mod error;

pub use error::{classify_sqlx, StoreError, StoreResult};

/// Longest topic name Kafka accepts
const MAX_TOPIC_LEN: usize = 249;

/// A message about to be persisted, borrowed from the consumer's copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewRecord<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
    pub payload: &'a [u8],
    pub key: Option<&'a [u8]>,
}

impl<'a> NewRecord<'a> {
    pub fn new(topic: &'a str, partition: i32, offset: i64, payload: &'a [u8]) -> Self {
        Self {
            topic,
            partition,
            offset,
            payload,
            key: None,
        }
    }

    pub fn with_key(mut self, key: Option<&'a [u8]>) -> Self {
        self.key = key;
        self
    }

    /// Human readable form of the payload, stored in the `content` column
    ///
    /// PostgreSQL TEXT cannot hold NUL, so it is replaced like any other
    /// undecodable byte. `payload` keeps the exact bytes.
    pub fn content(&self) -> String {
        String::from_utf8_lossy(self.payload).replace('\0', "\u{fffd}")
    }

    fn validate(&self) -> StoreResult<()> {
        if self.topic.is_empty() {
            return Err(StoreError::InvalidRecord(
                "Topic cannot be empty".to_string(),
            ));
        }

        if self.topic.len() > MAX_TOPIC_LEN {
            return Err(StoreError::InvalidRecord(format!(
                "Topic too long: {} characters (max {})",
                self.topic.len(),
                MAX_TOPIC_LEN
            )));
        }

        if self.partition < 0 {
            return Err(StoreError::InvalidRecord(format!(
                "Negative partition: {}",
                self.partition
            )));
        }

        if self.offset < 0 {
            return Err(StoreError::InvalidRecord(format!(
                "Negative offset: {}",
                self.offset
            )));
        }

        Ok(())
    }
}

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this (topic, partition, offset) was seen; carries the new row id
    Inserted(i64),

    /// Row already existed (redelivery); carries the existing row id
    Duplicate(i64),
}

impl InsertOutcome {
    pub fn record_id(&self) -> i64 {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, InsertOutcome::Duplicate(_))
    }
}

/// A persisted message as stored in the `messages` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Store-assigned identifier
    pub id: i64,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Payload decoded as UTF-8 (lossy)
    pub content: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    pub message_key: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Durable sink for relayed messages.
///
/// Implementations must make `insert_if_absent` idempotent on
/// `(topic, partition, offset)`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert the record unless one with the same coordinate already exists.
    ///
    /// # Errors
    ///
    /// Returns a classified [`StoreError`]; duplicates are *not* errors.
    async fn insert_if_absent(&self, record: NewRecord<'_>) -> StoreResult<InsertOutcome>;
}

/// PostgreSQL implementation of [`MessageStore`]
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch the record stored for a broker coordinate, if any
    pub async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> StoreResult<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, topic, "partition", "offset", content, payload, message_key, created_at
            FROM messages
            WHERE topic = $1 AND "partition" = $2 AND "offset" = $3
            "#,
        )
        .bind(topic)
        .bind(partition)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(StoredRecord {
                id: row.try_get("id")?,
                topic: row.try_get("topic")?,
                partition: row.try_get("partition")?,
                offset: row.try_get("offset")?,
                content: row.try_get("content")?,
                payload: row.try_get("payload")?,
                message_key: row.try_get("message_key")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
        .map_err(StoreError::Database)
    }

    /// Number of records stored for one partition of a topic
    pub async fn count_for_partition(&self, topic: &str, partition: i32) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)::BIGINT AS total
            FROM messages
            WHERE topic = $1 AND "partition" = $2
            "#,
        )
        .bind(topic)
        .bind(partition)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }

    async fn existing_id(&self, record: &NewRecord<'_>) -> StoreResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT id FROM messages
            WHERE topic = $1 AND "partition" = $2 AND "offset" = $3
            "#,
        )
        .bind(record.topic)
        .bind(record.partition)
        .bind(record.offset)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert_if_absent(&self, record: NewRecord<'_>) -> StoreResult<InsertOutcome> {
        record.validate()?;

        // ON CONFLICT DO NOTHING returns no row when the key already exists
        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (topic, "partition", "offset", content, payload, message_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (topic, "partition", "offset") DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.topic)
        .bind(record.partition)
        .bind(record.offset)
        .bind(record.content())
        .bind(record.payload)
        .bind(record.key)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                info!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    record_id = id,
                    "Message saved to database"
                );
                Ok(InsertOutcome::Inserted(id))
            }
            None => {
                let id = self.existing_id(&record).await?;
                debug!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    record_id = id,
                    "Message already stored (redelivery)"
                );
                Ok(InsertOutcome::Duplicate(id))
            }
        }
    }
}

/// Apply the bundled schema migrations
pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
    debug!("Running message store migrations");

    sqlx::migrate!("./migrations").run(pool).await?;

    info!("Message store migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_record() {
        assert!(NewRecord::new("test-topic", 0, 0, b"Hello").validate().is_ok());
        assert!(NewRecord::new(&"t".repeat(249), 3, i64::MAX, b"")
            .validate()
            .is_ok());

        let err = NewRecord::new("", 0, 0, b"Hello").validate().unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));

        let err = NewRecord::new(&"t".repeat(250), 0, 0, b"Hello")
            .validate()
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));

        let err = NewRecord::new("test-topic", -1, 0, b"Hello")
            .validate()
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));

        let err = NewRecord::new("test-topic", 0, -1, b"Hello")
            .validate()
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
    }

    #[test]
    fn test_content_is_lossy_utf8() {
        assert_eq!(NewRecord::new("t", 0, 0, b"Hello").content(), "Hello");
        assert_eq!(
            NewRecord::new("t", 0, 0, &[0x48, 0xff, 0x69]).content(),
            "H\u{fffd}i"
        );
        assert_eq!(NewRecord::new("t", 0, 0, b"a\0b").content(), "a\u{fffd}b");
    }

    #[test]
    fn test_insert_outcome() {
        assert_eq!(InsertOutcome::Inserted(7).record_id(), 7);
        assert_eq!(InsertOutcome::Duplicate(7).record_id(), 7);
        assert!(InsertOutcome::Duplicate(7).is_duplicate());
        assert!(!InsertOutcome::Inserted(7).is_duplicate());
    }
}
