//! Dead-letter storage (C9).
//!
//! Records carry the full bus context (key, topic, partition, offset, raw
//! payload) so replay is deterministic: redrive decodes the stored payload
//! and re-enters the normal pipeline through the outbox, never a side
//! channel.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// One dead-lettered message with its failure context.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    /// Entry id.
    pub id: i64,
    /// The broadcast the failed event concerned.
    pub broadcast_id: Uuid,
    /// The message's partition key on the bus.
    pub original_key: Option<String>,
    /// Source topic.
    pub original_topic: String,
    /// Source partition.
    pub original_partition: i32,
    /// Source offset.
    pub original_offset: i64,
    /// Why processing gave up.
    pub exception_message: String,
    /// The raw message payload, replayed verbatim on redrive.
    pub original_payload: Vec<u8>,
    /// Correlation id carried by the failed event.
    pub correlation_id: String,
    /// When retries were exhausted.
    pub failed_at: DateTime<Utc>,
}

/// Repository over the `dead_letter_events` table.
#[derive(Clone)]
pub struct DeadLetterStore {
    pool: PgPool,
}

impl DeadLetterStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a dead-lettered message. Returns the entry id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn add(
        &self,
        broadcast_id: Uuid,
        original_key: Option<&str>,
        original_topic: &str,
        original_partition: i32,
        original_offset: i64,
        exception_message: &str,
        original_payload: &[u8],
        correlation_id: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_letter_events
                (broadcast_id, original_key, original_topic, original_partition,
                 original_offset, exception_message, original_payload, correlation_id, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            ",
        )
        .bind(broadcast_id)
        .bind(original_key)
        .bind(original_topic)
        .bind(original_partition)
        .bind(original_offset)
        .bind(exception_message)
        .bind(original_payload)
        .bind(correlation_id)
        .bind(failed_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            dlt_id = id,
            broadcast_id = %broadcast_id,
            topic = original_topic,
            partition = original_partition,
            offset = original_offset,
            error = exception_message,
            "Message dead-lettered"
        );
        metrics::counter!("herald.dlt.added").increment(1);

        Ok(id)
    }

    /// List records, oldest failure first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list(&self, limit: i64) -> Result<Vec<DeadLetterRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, broadcast_id, original_key, original_topic, original_partition,
                   original_offset, exception_message, original_payload, correlation_id, failed_at
            FROM dead_letter_events
            ORDER BY failed_at
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn get(&self, id: i64) -> Result<DeadLetterRecord, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, broadcast_id, original_key, original_topic, original_partition,
                   original_offset, exception_message, original_payload, correlation_id, failed_at
            FROM dead_letter_events
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("dead-letter record {id}")))?;

        Ok(Self::row_to_record(&row))
    }

    /// Delete one record. Returns `true` when it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM dead_letter_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record. Returns the row count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM dead_letter_events")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete records that failed before `cutoff` (retention sweep).
    /// Returns the row count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn delete_failed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM dead_letter_events WHERE failed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Record count, for monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letter_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    fn row_to_record(row: &PgRow) -> DeadLetterRecord {
        DeadLetterRecord {
            id: row.get("id"),
            broadcast_id: row.get("broadcast_id"),
            original_key: row.get("original_key"),
            original_topic: row.get("original_topic"),
            original_partition: row.get("original_partition"),
            original_offset: row.get("original_offset"),
            exception_message: row.get("exception_message"),
            original_payload: row.get("original_payload"),
            correlation_id: row.get("correlation_id"),
            failed_at: row.get("failed_at"),
        }
    }
}
