//! Broadcast repository.
//!
//! Broadcasts are immutable after creation except for `status` and
//! `updated_at`; every status write re-checks the status machine in SQL so
//! concurrent workers cannot regress a row (transitions are linearized by
//! row-level locking).

use crate::error::StoreError;
use herald_core::broadcast::{Broadcast, BroadcastStatus, Priority, TargetType};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

/// Repository over the `broadcasts` table.
#[derive(Clone)]
pub struct BroadcastRepository {
    pool: PgPool,
}

impl BroadcastRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new broadcast inside an existing transaction (composes with
    /// the outbox append).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the id already exists, otherwise
    /// [`StoreError::Database`] on failure.
    pub async fn insert(conn: &mut PgConnection, broadcast: &Broadcast) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO broadcasts
                (id, sender_id, sender_name, content, target_type, target_ids, priority,
                 category, scheduled_at, expires_at, fire_and_forget, correlation_id,
                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(broadcast.id)
        .bind(&broadcast.sender_id)
        .bind(&broadcast.sender_name)
        .bind(&broadcast.content)
        .bind(broadcast.target_type.as_str())
        .bind(&broadcast.target_ids)
        .bind(broadcast.priority.as_str())
        .bind(&broadcast.category)
        .bind(broadcast.scheduled_at)
        .bind(broadcast.expires_at)
        .bind(broadcast.fire_and_forget)
        .bind(&broadcast.correlation_id)
        .bind(broadcast.status.as_str())
        .bind(broadcast.created_at)
        .bind(broadcast.updated_at)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "broadcast {} already exists",
                broadcast.id
            )));
        }
        Ok(())
    }

    /// Fetch one broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn get(&self, id: Uuid) -> Result<Broadcast, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, sender_id, sender_name, content, target_type, target_ids, priority,
                   category, scheduled_at, expires_at, fire_and_forget, correlation_id,
                   status, created_at, updated_at
            FROM broadcasts
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("broadcast {id}")))?;

        Self::row_to_broadcast(&row)
    }

    /// List broadcasts, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list(&self, limit: i64) -> Result<Vec<Broadcast>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, sender_id, sender_name, content, target_type, target_ids, priority,
                   category, scheduled_at, expires_at, fire_and_forget, correlation_id,
                   status, created_at, updated_at
            FROM broadcasts
            ORDER BY created_at DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_broadcast).collect()
    }

    /// Advance a broadcast's status inside an existing transaction, guarded
    /// by the status machine: the update applies only when the current
    /// status legally advances to `next`.
    ///
    /// Returns `true` when the transition happened, `false` when the row was
    /// already at or past `next` (idempotent replay).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the broadcast does not exist.
    pub async fn advance_status(
        conn: &mut PgConnection,
        id: Uuid,
        next: BroadcastStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let allowed_from: &[&str] = match next {
            BroadcastStatus::Active => &["SCHEDULED"],
            BroadcastStatus::Expired => &["ACTIVE", "SCHEDULED"],
            BroadcastStatus::Cancelled => &["SCHEDULED", "ACTIVE"],
            BroadcastStatus::Scheduled => &[],
        };

        let result = sqlx::query(
            r"
            UPDATE broadcasts
            SET status = $2, updated_at = $3
            WHERE id = $1 AND status = ANY($4)
            ",
        )
        .bind(id)
        .bind(next.as_str())
        .bind(now)
        .bind(allowed_from)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(broadcast_id = %id, status = next.as_str(), "Broadcast status advanced");
            return Ok(true);
        }

        // Distinguish "absent" from "already transitioned".
        let exists: Option<(String,)> = sqlx::query_as("SELECT status FROM broadcasts WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        match exists {
            None => Err(StoreError::NotFound(format!("broadcast {id}"))),
            Some(_) => Ok(false),
        }
    }

    /// Broadcasts with `status = SCHEDULED` and `scheduled_at <= horizon`,
    /// oldest first. The activator uses `horizon = now + prefetch` to
    /// pre-materialize targets and `horizon = now` to activate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn scheduled_until(&self, horizon: DateTime<Utc>) -> Result<Vec<Broadcast>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, sender_id, sender_name, content, target_type, target_ids, priority,
                   category, scheduled_at, expires_at, fire_and_forget, correlation_id,
                   status, created_at, updated_at
            FROM broadcasts
            WHERE status = 'SCHEDULED' AND scheduled_at <= $1
            ORDER BY scheduled_at
            ",
        )
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_broadcast).collect()
    }

    /// Active broadcasts past their expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<Broadcast>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, sender_id, sender_name, content, target_type, target_ids, priority,
                   category, scheduled_at, expires_at, fire_and_forget, correlation_id,
                   status, created_at, updated_at
            FROM broadcasts
            WHERE status = 'ACTIVE' AND expires_at IS NOT NULL AND expires_at < $1
            ORDER BY expires_at
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_broadcast).collect()
    }

    fn row_to_broadcast(row: &PgRow) -> Result<Broadcast, StoreError> {
        let target_type: String = row.get("target_type");
        let priority: String = row.get("priority");
        let status: String = row.get("status");
        Ok(Broadcast {
            id: row.get("id"),
            sender_id: row.get("sender_id"),
            sender_name: row.get("sender_name"),
            content: row.get("content"),
            target_type: TargetType::parse(&target_type)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            target_ids: row.get("target_ids"),
            priority: Priority::parse(&priority).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            category: row.get("category"),
            scheduled_at: row.get("scheduled_at"),
            expires_at: row.get("expires_at"),
            fire_and_forget: row.get("fire_and_forget"),
            correlation_id: row.get("correlation_id"),
            status: BroadcastStatus::parse(&status)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}
