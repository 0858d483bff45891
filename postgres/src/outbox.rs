//! The transactional outbox (C1).
//!
//! Two contracts:
//!
//! - [`Outbox::publish_with_state`] applies a state mutation and appends
//!   events in one transaction: either both persist or neither does.
//! - [`Outbox::read_batch`] returns up to `n` unprocessed rows locked for
//!   the duration of the surrounding transaction (`FOR UPDATE SKIP LOCKED`),
//!   so no other drainer receives them.
//!
//! Rows are deleted after successful publish; when admin traffic stops the
//! table is eventually empty. Drain order is `created_at`, ties broken by
//! id. If publish succeeds but the delete's transaction fails, the next
//! drain re-publishes; consumers are idempotent by event id.

use crate::error::StoreError;
use futures::future::BoxFuture;
use herald_core::envelope::{AggregateType, EventKind};
use herald_core::outbox::OutboxEvent;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row, Transaction};
use uuid::Uuid;

/// The durable outbox table.
#[derive(Clone)]
pub struct Outbox {
    pool: PgPool,
}

impl Outbox {
    /// Create an outbox over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply `mutate` and append `events` atomically.
    ///
    /// The closure receives the transaction's connection; every repository
    /// write performed through it commits together with the event rows or
    /// not at all.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or [`StoreError::Database`] if the
    /// transaction itself fails. On any error the transaction is rolled back.
    pub async fn publish_with_state<F>(
        &self,
        events: &[OutboxEvent],
        mutate: F,
    ) -> Result<(), StoreError>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<(), StoreError>> + Send,
    {
        let mut tx = self.pool.begin().await?;

        mutate(&mut *tx).await?;
        Self::append(&mut *tx, events).await?;

        tx.commit().await?;

        metrics::counter!("herald.outbox.appended").increment(events.len() as u64);
        Ok(())
    }

    /// Append events inside an existing transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if an insert fails.
    pub async fn append(conn: &mut PgConnection, events: &[OutboxEvent]) -> Result<(), StoreError> {
        for event in events {
            sqlx::query(
                r"
                INSERT INTO outbox_events
                    (id, aggregate_type, aggregate_id, event_type, topic, payload, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(event.id)
            .bind(event.aggregate_type.as_str())
            .bind(&event.aggregate_id)
            .bind(event.event_type.as_str())
            .bind(&event.topic)
            .bind(&event.payload)
            .bind(event.created_at)
            .execute(&mut *conn)
            .await?;

            tracing::debug!(
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                aggregate_id = %event.aggregate_id,
                "Outbox event appended"
            );
        }
        Ok(())
    }

    /// Begin a drain transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a transaction cannot be opened.
    pub async fn begin(&self) -> Result<Transaction<'static, sqlx::Postgres>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Read up to `n` unprocessed rows, oldest first, locked for the
    /// duration of `tx`. Rows locked by a concurrent drainer are skipped,
    /// so two relays never double-publish the same row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure and
    /// [`StoreError::Corrupt`] if a stored row fails to decode.
    pub async fn read_batch(
        tx: &mut PgConnection,
        n: i64,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, aggregate_type, aggregate_id, event_type, topic, payload, created_at
            FROM outbox_events
            ORDER BY created_at, id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(n)
        .fetch_all(tx)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    /// Delete published rows inside the drain transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    pub async fn delete(tx: &mut PgConnection, ids: &[Uuid]) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM outbox_events WHERE id = ANY($1)")
            .bind(ids)
            .execute(tx)
            .await?;
        Ok(())
    }

    /// Unprocessed row count, for observability.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn depth(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    fn row_to_event(row: &PgRow) -> Result<OutboxEvent, StoreError> {
        let aggregate_type: String = row.get("aggregate_type");
        let event_type: String = row.get("event_type");
        Ok(OutboxEvent {
            id: row.get("id"),
            aggregate_type: AggregateType::parse(&aggregate_type)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            aggregate_id: row.get("aggregate_id"),
            event_type: parse_event_kind(&event_type)?,
            topic: row.get("topic"),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
        })
    }
}

fn parse_event_kind(s: &str) -> Result<EventKind, StoreError> {
    match s {
        "BROADCAST.CREATED" => Ok(EventKind::BroadcastCreated),
        "BROADCAST.CANCELLED" => Ok(EventKind::BroadcastCancelled),
        "BROADCAST.EXPIRED" => Ok(EventKind::BroadcastExpired),
        "BROADCAST.REMOVED" => Ok(EventKind::BroadcastRemoved),
        "DELIVERY.PUSH" => Ok(EventKind::DeliveryPush),
        "DELIVERY.DELIVERED" => Ok(EventKind::DeliveryDelivered),
        "DELIVERY.READ" => Ok(EventKind::DeliveryRead),
        "REDRIVE.REQUESTED" => Ok(EventKind::RedriveRequested),
        other => Err(StoreError::Corrupt(format!("unknown event kind: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_parse_covers_wire_names() {
        for kind in [
            EventKind::BroadcastCreated,
            EventKind::BroadcastCancelled,
            EventKind::BroadcastExpired,
            EventKind::BroadcastRemoved,
            EventKind::DeliveryPush,
            EventKind::DeliveryDelivered,
            EventKind::DeliveryRead,
            EventKind::RedriveRequested,
        ] {
            assert_eq!(parse_event_kind(kind.as_str()).ok(), Some(kind));
        }
        assert!(parse_event_kind("DELIVERY.BOUNCED").is_err());
    }
}
