//! Per-recipient delivery rows.
//!
//! Rows are unique on `(broadcast_id, recipient_id)`; fan-out inserts are
//! `ON CONFLICT DO NOTHING` so targeting retries are idempotent. Transition
//! writes carry their guards in SQL (`WHERE delivery_status IN (...)`), which
//! is what makes replayed bus events no-ops and keeps `DELIVERED`/`READ`
//! sticky outside the redrive path.

use crate::error::StoreError;
use herald_core::broadcast::Priority;
use herald_core::delivery::{DeliveryStatus, ReadStatus, RecipientDelivery};
use herald_core::inbox::InboxEntry;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

/// A delivery row joined to its broadcast's display fields.
#[derive(Debug, Clone)]
pub struct InboxRow {
    /// The delivery row.
    pub delivery: RecipientDelivery,
    /// Broadcast body.
    pub content: String,
    /// Broadcast sender display name.
    pub sender_name: String,
    /// Broadcast priority.
    pub priority: Priority,
    /// Broadcast category.
    pub category: Option<String>,
    /// Broadcast correlation id, carried into emitted envelopes.
    pub correlation_id: String,
}

impl InboxRow {
    /// Project into the cacheable inbox entry.
    #[must_use]
    pub fn to_entry(&self) -> InboxEntry {
        InboxEntry::from_delivery(
            &self.delivery,
            self.content.clone(),
            self.sender_name.clone(),
            self.priority,
            self.category.clone(),
        )
    }
}

/// Repository over the `recipient_deliveries` table.
#[derive(Clone)]
pub struct DeliveryRepository {
    pool: PgPool,
}

impl DeliveryRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a batch of `PENDING` rows, skipping pairs that already exist.
    /// Returns the number actually inserted, which is what advances
    /// `total_targeted` (re-running targeting after a partial failure never
    /// double-counts).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn insert_pending_batch(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        recipient_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if recipient_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r"
            INSERT INTO recipient_deliveries
                (id, broadcast_id, recipient_id, delivery_status, read_status, created_at, updated_at)
            SELECT gen_random_uuid(), $1, r, 'PENDING', 'UNREAD', $3, $3
            FROM UNNEST($2::text[]) AS r
            ON CONFLICT (broadcast_id, recipient_id) DO NOTHING
            ",
        )
        .bind(broadcast_id)
        .bind(recipient_ids)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fetch one row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn get(
        &self,
        broadcast_id: Uuid,
        recipient_id: &str,
    ) -> Result<RecipientDelivery, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, broadcast_id, recipient_id, delivery_status, read_status,
                   delivered_at, read_at, created_at, updated_at
            FROM recipient_deliveries
            WHERE broadcast_id = $1 AND recipient_id = $2
            ",
        )
        .bind(broadcast_id)
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::NotFound(format!("delivery ({broadcast_id}, {recipient_id})"))
        })?;

        Self::row_to_delivery(&row)
    }

    /// Stamp `PENDING|FAILED → DELIVERED`. Returns the row's `created_at`
    /// when this call made the transition (the consumer derives the delivery
    /// latency from it), `None` when the row was already delivered or read
    /// (a replayed event, ignored).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn mark_delivered(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r"
            UPDATE recipient_deliveries
            SET delivery_status = 'DELIVERED', delivered_at = $3, updated_at = $3
            WHERE broadcast_id = $1 AND recipient_id = $2
              AND delivery_status IN ('PENDING', 'FAILED')
            RETURNING created_at
            ",
        )
        .bind(broadcast_id)
        .bind(recipient_id)
        .bind(now)
        .fetch_optional(conn)
        .await?;

        Ok(row.map(|(created_at,)| created_at))
    }

    /// Stamp `UNREAD → READ`. Returns `true` when this call made the
    /// transition. Requires the row to be `DELIVERED` (mark delivery first;
    /// the read handler does).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn mark_read(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE recipient_deliveries
            SET read_status = 'READ', read_at = $3, updated_at = $3
            WHERE broadcast_id = $1 AND recipient_id = $2
              AND read_status = 'UNREAD' AND delivery_status = 'DELIVERED'
            ",
        )
        .bind(broadcast_id)
        .bind(recipient_id)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stamp `PENDING → FAILED` (backpressure drop or exhausted retries).
    /// Returns `true` when this call made the transition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn mark_failed(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE recipient_deliveries
            SET delivery_status = 'FAILED', updated_at = $3
            WHERE broadcast_id = $1 AND recipient_id = $2 AND delivery_status = 'PENDING'
            ",
        )
        .bind(broadcast_id)
        .bind(recipient_id)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark every still-`PENDING` row of a cancelled broadcast `SUPERSEDED`.
    /// Returns the row count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn supersede_pending(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE recipient_deliveries
            SET delivery_status = 'SUPERSEDED', updated_at = $2
            WHERE broadcast_id = $1 AND delivery_status = 'PENDING'
            ",
        )
        .bind(broadcast_id)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// The redrive reset: back to `PENDING`, `delivered_at` cleared. The
    /// only sanctioned regression of a delivery row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the row does not exist.
    pub async fn reset_for_redrive(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE recipient_deliveries
            SET delivery_status = 'PENDING', delivered_at = NULL, updated_at = $3
            WHERE broadcast_id = $1 AND recipient_id = $2
            ",
        )
        .bind(broadcast_id)
        .bind(recipient_id)
        .bind(now)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "delivery ({broadcast_id}, {recipient_id})"
            )));
        }
        Ok(())
    }

    /// A recipient's message history: every non-superseded row whose
    /// broadcast is past activation, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn messages_for(&self, recipient_id: &str) -> Result<Vec<InboxRow>, StoreError> {
        self.inbox_query(
            recipient_id,
            r"
            SELECT d.id, d.broadcast_id, d.recipient_id, d.delivery_status, d.read_status,
                   d.delivered_at, d.read_at, d.created_at, d.updated_at,
                   b.content, b.sender_name, b.priority, b.category, b.correlation_id
            FROM recipient_deliveries d
            JOIN broadcasts b ON b.id = d.broadcast_id
            WHERE d.recipient_id = $1
              AND d.delivery_status <> 'SUPERSEDED'
              AND b.status IN ('ACTIVE', 'EXPIRED')
            ORDER BY d.created_at DESC
            ",
        )
        .await
    }

    /// Unread messages of still-active broadcasts, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn unread_for(&self, recipient_id: &str) -> Result<Vec<InboxRow>, StoreError> {
        self.inbox_query(
            recipient_id,
            r"
            SELECT d.id, d.broadcast_id, d.recipient_id, d.delivery_status, d.read_status,
                   d.delivered_at, d.read_at, d.created_at, d.updated_at,
                   b.content, b.sender_name, b.priority, b.category, b.correlation_id
            FROM recipient_deliveries d
            JOIN broadcasts b ON b.id = d.broadcast_id
            WHERE d.recipient_id = $1
              AND d.delivery_status <> 'SUPERSEDED'
              AND d.read_status = 'UNREAD'
              AND b.status = 'ACTIVE'
            ORDER BY d.created_at DESC
            ",
        )
        .await
    }

    /// Messages of currently-active broadcasts, newest first. This is the
    /// view the shared inbox cache snapshots and the connect replay drains.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn active_for(&self, recipient_id: &str) -> Result<Vec<InboxRow>, StoreError> {
        self.inbox_query(
            recipient_id,
            r"
            SELECT d.id, d.broadcast_id, d.recipient_id, d.delivery_status, d.read_status,
                   d.delivered_at, d.read_at, d.created_at, d.updated_at,
                   b.content, b.sender_name, b.priority, b.category, b.correlation_id
            FROM recipient_deliveries d
            JOIN broadcasts b ON b.id = d.broadcast_id
            WHERE d.recipient_id = $1
              AND d.delivery_status <> 'SUPERSEDED'
              AND b.status = 'ACTIVE'
            ORDER BY d.created_at DESC
            ",
        )
        .await
    }

    /// Still-pending messages of active broadcasts, oldest first: the
    /// catch-up queue drained into a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn pending_for(&self, recipient_id: &str) -> Result<Vec<InboxRow>, StoreError> {
        self.inbox_query(
            recipient_id,
            r"
            SELECT d.id, d.broadcast_id, d.recipient_id, d.delivery_status, d.read_status,
                   d.delivered_at, d.read_at, d.created_at, d.updated_at,
                   b.content, b.sender_name, b.priority, b.category, b.correlation_id
            FROM recipient_deliveries d
            JOIN broadcasts b ON b.id = d.broadcast_id
            WHERE d.recipient_id = $1
              AND d.delivery_status = 'PENDING'
              AND b.status = 'ACTIVE'
            ORDER BY d.created_at
            ",
        )
        .await
    }

    /// Distinct recipients holding a row for this broadcast, paged. The
    /// removal fan-out walks these to find connected nodes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn recipients_of(
        &self,
        broadcast_id: Uuid,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r"
            SELECT recipient_id
            FROM recipient_deliveries
            WHERE broadcast_id = $1 AND ($2::text IS NULL OR recipient_id > $2)
            ORDER BY recipient_id
            LIMIT $3
            ",
        )
        .bind(broadcast_id)
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(r,)| r).collect())
    }

    async fn inbox_query(&self, recipient_id: &str, sql: &str) -> Result<Vec<InboxRow>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(recipient_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_inbox).collect()
    }

    fn row_to_delivery(row: &PgRow) -> Result<RecipientDelivery, StoreError> {
        let delivery_status: String = row.get("delivery_status");
        let read_status: String = row.get("read_status");
        Ok(RecipientDelivery {
            id: row.get("id"),
            broadcast_id: row.get("broadcast_id"),
            recipient_id: row.get("recipient_id"),
            delivery_status: DeliveryStatus::parse(&delivery_status)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            read_status: ReadStatus::parse(&read_status)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            delivered_at: row.get("delivered_at"),
            read_at: row.get("read_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_inbox(row: &PgRow) -> Result<InboxRow, StoreError> {
        let priority: String = row.get("priority");
        Ok(InboxRow {
            delivery: Self::row_to_delivery(row)?,
            content: row.get("content"),
            sender_name: row.get("sender_name"),
            priority: Priority::parse(&priority).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            category: row.get("category"),
            correlation_id: row.get("correlation_id"),
        })
    }
}
