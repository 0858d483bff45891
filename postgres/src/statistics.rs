//! Per-broadcast statistics.
//!
//! Counters are monotonic and advance only when the caller proves a first
//! transition (the delivery repository's guarded updates return whether the
//! transition happened). The running delivery-time mean folds each sample in
//! with the previous count, all inside one UPDATE so concurrent consumers
//! compose through row-level locking.

use crate::error::StoreError;
use herald_core::stats::BroadcastStatistics;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

/// Repository over the `broadcast_statistics` table.
#[derive(Clone)]
pub struct StatisticsRepository {
    pool: PgPool,
}

impl StatisticsRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the zeroed row for a new broadcast (idempotent).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn ensure(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO broadcast_statistics (broadcast_id, calculated_at)
            VALUES ($1, $2)
            ON CONFLICT (broadcast_id) DO NOTHING
            ",
        )
        .bind(broadcast_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Add freshly-materialized targets to `total_targeted`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn add_targeted(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        count: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if count == 0 {
            return Ok(());
        }
        sqlx::query(
            r"
            UPDATE broadcast_statistics
            SET total_targeted = total_targeted + $2, calculated_at = $3
            WHERE broadcast_id = $1
            ",
        )
        .bind(broadcast_id)
        .bind(count)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Record one first `DELIVERED` transition with its latency sample.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn record_delivered(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        delivery_time_ms: f64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE broadcast_statistics
            SET total_delivered = total_delivered + 1,
                avg_delivery_time_ms =
                    (avg_delivery_time_ms * total_delivered + $2) / (total_delivered + 1),
                calculated_at = $3
            WHERE broadcast_id = $1
            ",
        )
        .bind(broadcast_id)
        .bind(delivery_time_ms)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Record one first `READ` transition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn record_read(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE broadcast_statistics
            SET total_read = total_read + 1, calculated_at = $2
            WHERE broadcast_id = $1
            ",
        )
        .bind(broadcast_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Record one first `FAILED` transition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn record_failed(
        conn: &mut PgConnection,
        broadcast_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE broadcast_statistics
            SET total_failed = total_failed + 1, calculated_at = $2
            WHERE broadcast_id = $1
            ",
        )
        .bind(broadcast_id)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Fetch one broadcast's counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if absent.
    pub async fn get(&self, broadcast_id: Uuid) -> Result<BroadcastStatistics, StoreError> {
        let row = sqlx::query(
            r"
            SELECT broadcast_id, total_targeted, total_delivered, total_read, total_failed,
                   avg_delivery_time_ms, calculated_at
            FROM broadcast_statistics
            WHERE broadcast_id = $1
            ",
        )
        .bind(broadcast_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("statistics for broadcast {broadcast_id}")))?;

        Ok(BroadcastStatistics {
            broadcast_id: row.get("broadcast_id"),
            total_targeted: row.get("total_targeted"),
            total_delivered: row.get("total_delivered"),
            total_read: row.get("total_read"),
            total_failed: row.get("total_failed"),
            avg_delivery_time_ms: row.get("avg_delivery_time_ms"),
            calculated_at: row.get("calculated_at"),
        })
    }
}
