//! Dead-letter redrive (C9).
//!
//! Redrive deserializes the stored payload, resets the delivery row to
//! `PENDING` in an independent transaction, and re-publishes through the
//! outbox so the normal consumer path finishes the job, never a side
//! channel.
//! Purging removes records without side effects.

use crate::error::OrchestratorError;
use chrono::Utc;
use herald_core::envelope::{EventEnvelope, EventKind};
use herald_core::fault::FaultFlags;
use herald_core::outbox::OutboxEvent;
use herald_postgres::{
    BroadcastRepository, DeadLetterRecord, DeadLetterStore, DeliveryRepository, Outbox, StoreError,
};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of a bulk redrive.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveSummary {
    /// Records re-enqueued.
    pub succeeded: u64,
    /// Records that failed to redrive (left in place).
    pub failed: u64,
}

/// Replays dead-lettered deliveries through the normal pipeline.
pub struct RedriveService {
    dead_letters: DeadLetterStore,
    outbox: Outbox,
    broadcasts: BroadcastRepository,
    flags: Arc<dyn FaultFlags>,
    topic: String,
}

impl RedriveService {
    /// Wire up the service.
    #[must_use]
    pub fn new(
        dead_letters: DeadLetterStore,
        outbox: Outbox,
        broadcasts: BroadcastRepository,
        flags: Arc<dyn FaultFlags>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            dead_letters,
            outbox,
            broadcasts,
            flags,
            topic: topic.into(),
        }
    }

    /// Redrive one record through the normal pipeline and delete it.
    ///
    /// A per-delivery failure (the envelope names a recipient) resets that
    /// delivery row and emits `REDRIVE.REQUESTED`; a broadcast-level
    /// failure (no recipient, e.g. a dead-lettered `BROADCAST.CREATED`)
    /// re-enqueues the original envelope verbatim, and the idempotent
    /// fan-out picks up where it died.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an absent record,
    /// [`StoreError::Conflict`] when the broadcast is already terminal (a
    /// terminal broadcast must not regain deliveries), and decode errors
    /// when the stored payload is not an envelope.
    pub async fn redrive(&self, id: i64) -> Result<(), OrchestratorError> {
        let record = self.dead_letters.get(id).await?;
        let envelope = EventEnvelope::from_bytes(&record.original_payload)?;

        let broadcast = self.broadcasts.get(record.broadcast_id).await?;
        if broadcast.status.is_terminal() {
            return Err(OrchestratorError::Store(StoreError::Conflict(format!(
                "broadcast {} is {}, refusing redrive",
                broadcast.id, broadcast.status
            ))));
        }

        // The injected-failure mark must go, or replay fails the same way.
        self.flags.clear_failing(record.broadcast_id).await?;

        let broadcast_id = record.broadcast_id;
        let now = Utc::now();
        if let Some(recipient_id) = envelope.recipient_id.clone() {
            let request = EventEnvelope::new(
                EventKind::RedriveRequested,
                broadcast_id,
                now,
                &record.correlation_id,
            )
            .for_recipient(recipient_id.clone());
            let event = OutboxEvent::from_envelope(&self.topic, &request)?;

            self.outbox
                .publish_with_state(std::slice::from_ref(&event), move |conn| {
                    Box::pin(async move {
                        DeliveryRepository::reset_for_redrive(
                            conn,
                            broadcast_id,
                            &recipient_id,
                            now,
                        )
                        .await
                    })
                })
                .await?;
        } else {
            let event = OutboxEvent::from_envelope(&self.topic, &envelope)?;
            self.outbox
                .publish_with_state(std::slice::from_ref(&event), |_conn| {
                    Box::pin(async { Ok(()) })
                })
                .await?;
        }

        self.dead_letters.delete(id).await?;
        tracing::info!(
            dlt_id = id,
            broadcast_id = %broadcast_id,
            "Dead letter redriven"
        );
        metrics::counter!("herald.dlt.redriven").increment(1);
        Ok(())
    }

    /// Redrive every record, aggregating successes and failures.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] only if the listing itself fails;
    /// per-record failures land in the summary.
    pub async fn redrive_all(&self) -> Result<RedriveSummary, OrchestratorError> {
        let records = self.dead_letters.list(i64::MAX).await?;
        let mut summary = RedriveSummary::default();

        for record in records {
            match self.redrive(record.id).await {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    tracing::warn!(dlt_id = record.id, error = %e, "Redrive failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// List records for inspection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn list(&self, limit: i64) -> Result<Vec<DeadLetterRecord>, OrchestratorError> {
        Ok(self.dead_letters.list(limit).await?)
    }

    /// Purge one record. Returns `true` when it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn purge(&self, id: i64) -> Result<bool, OrchestratorError> {
        Ok(self.dead_letters.delete(id).await?)
    }

    /// Purge every record. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn purge_all(&self) -> Result<u64, OrchestratorError> {
        Ok(self.dead_letters.delete_all().await?)
    }
}
