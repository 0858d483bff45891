//! Durable mirror of the session registry.
//!
//! The Redis registry is the fast path; this table is the retained record
//! (connect/disconnect history, heartbeat index) that the daily purge job
//! trims. Losing a Redis row never loses a message, and losing a mirror row
//! only loses history.

use crate::error::StoreError;
use herald_core::session::SessionRecord;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Repository over the `sessions` table.
#[derive(Clone)]
pub struct SessionMirror {
    pool: PgPool,
}

impl SessionMirror {
    /// Create a repository over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a connection, or revive it if the connection id reconnected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn record_connect(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let connected_at = millis_to_utc(session.connected_at_epoch_milli)?;
        let last_activity = millis_to_utc(session.last_activity_at_epoch_milli)?;
        sqlx::query(
            r"
            INSERT INTO sessions
                (connection_id, recipient_id, node_id, cluster_id,
                 connected_at, last_activity_at, disconnected_at)
            VALUES ($1, $2, $3, $4, $5, $6, NULL)
            ON CONFLICT (connection_id) DO UPDATE
            SET last_activity_at = EXCLUDED.last_activity_at, disconnected_at = NULL
            ",
        )
        .bind(session.connection_id)
        .bind(&session.recipient_id)
        .bind(&session.node_id)
        .bind(&session.cluster_id)
        .bind(connected_at)
        .bind(last_activity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refresh last-activity for a heartbeat batch.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn record_heartbeat(
        &self,
        connection_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if connection_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r"
            UPDATE sessions
            SET last_activity_at = $2
            WHERE connection_id = ANY($1) AND disconnected_at IS NULL
            ",
        )
        .bind(connection_ids)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark connections closed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn record_disconnect(
        &self,
        connection_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if connection_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r"
            UPDATE sessions
            SET disconnected_at = $2
            WHERE connection_id = ANY($1) AND disconnected_at IS NULL
            ",
        )
        .bind(connection_ids)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete disconnected rows older than `cutoff`. Returns the row count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn purge_disconnected_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM sessions
            WHERE disconnected_at IS NOT NULL AND disconnected_at < $1
            ",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("epoch millis out of range: {millis}")))
}
