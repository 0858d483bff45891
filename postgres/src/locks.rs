//! Single-winner locks for scheduled jobs and the outbox relay.
//!
//! Each named lock carries two durations. `lock_at_least`: no other node
//! may re-acquire until it elapses, even if the holder finishes early.
//! `lock_at_most`: the lock self-releases after it, so a crashed holder
//! never wedges the cluster. The claim is one atomic upsert: whoever's
//! update lands first owns the tick.

use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

/// Named single-winner lock table.
#[derive(Clone)]
pub struct SchedulerLock {
    pool: PgPool,
    holder: String,
}

/// Proof of a held lock. Call [`LockGuard::release`] when the tick's work is
/// done; if the process dies instead, `lock_at_most` expires the claim.
pub struct LockGuard {
    pool: PgPool,
    name: String,
    holder: String,
    at_least_until: DateTime<Utc>,
}

impl SchedulerLock {
    /// Create the lock handle for this node. `holder` identifies the node in
    /// the lock rows (diagnostics only).
    #[must_use]
    pub fn new(pool: PgPool, holder: impl Into<String>) -> Self {
        Self {
            pool,
            holder: holder.into(),
        }
    }

    /// Try to win the named lock. Returns `None` when another node holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn try_acquire(
        &self,
        name: &str,
        lock_at_least: Duration,
        lock_at_most: Duration,
    ) -> Result<Option<LockGuard>, StoreError> {
        let now = Utc::now();
        let won: Option<(String,)> = sqlx::query_as(
            r"
            INSERT INTO scheduler_locks (name, locked_by, locked_at, lock_until)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET locked_by = EXCLUDED.locked_by,
                locked_at = EXCLUDED.locked_at,
                lock_until = EXCLUDED.lock_until
            WHERE scheduler_locks.lock_until < $3
            RETURNING name
            ",
        )
        .bind(name)
        .bind(&self.holder)
        .bind(now)
        .bind(now + lock_at_most)
        .fetch_optional(&self.pool)
        .await?;

        if won.is_none() {
            tracing::debug!(lock = name, "Lock held elsewhere, skipping tick");
            return Ok(None);
        }

        tracing::debug!(lock = name, holder = %self.holder, "Lock acquired");
        Ok(Some(LockGuard {
            pool: self.pool.clone(),
            name: name.to_string(),
            holder: self.holder.clone(),
            at_least_until: now + lock_at_least,
        }))
    }
}

impl LockGuard {
    /// Release the lock, keeping it held until `lock_at_least` has elapsed
    /// (a fast tick must not let another node double-run the job inside the
    /// same interval).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure; the lock then simply
    /// expires at `lock_at_most`.
    pub async fn release(self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE scheduler_locks
            SET lock_until = GREATEST($3, now())
            WHERE name = $1 AND locked_by = $2
            ",
        )
        .bind(&self.name)
        .bind(&self.holder)
        .bind(self.at_least_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
