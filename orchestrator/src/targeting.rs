//! Targeting precomputation (C8).
//!
//! Expands a broadcast's ALL/ROLE/SELECTED expression through the external
//! recipient directory and materializes `PENDING` delivery rows in batches.
//! Row creation is idempotent on the `(broadcast_id, recipient_id)` key, so
//! a partial failure simply resumes on the next scheduler tick, and
//! `total_targeted` advances only by rows actually inserted.

use crate::error::OrchestratorError;
use chrono::Utc;
use herald_core::broadcast::Broadcast;
use herald_core::directory::RecipientDirectory;
use herald_postgres::{DeliveryRepository, Outbox, StatisticsRepository};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Expands targets and materializes delivery rows.
pub struct TargetPlanner {
    directory: Arc<dyn RecipientDirectory>,
    outbox: Outbox,
    batch_size: usize,
}

impl TargetPlanner {
    /// Wire up the planner. `batch_size` bounds each insert transaction.
    #[must_use]
    pub fn new(directory: Arc<dyn RecipientDirectory>, outbox: Outbox, batch_size: usize) -> Self {
        Self {
            directory,
            outbox,
            batch_size: batch_size.max(1),
        }
    }

    /// Resolve the broadcast's targets and insert `PENDING` rows for them.
    /// Returns the full recipient list and the number of rows this call
    /// actually created.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Directory`] when the directory is
    /// unavailable (the caller leaves the broadcast as-is and retries on
    /// the next tick) or [`OrchestratorError::Store`] on insert failure.
    pub async fn precompute_and_store(
        &self,
        broadcast: &Broadcast,
    ) -> Result<(Vec<String>, u64), OrchestratorError> {
        let recipients = self
            .directory
            .resolve(broadcast.target_type, &broadcast.target_ids)
            .await?;

        let mut inserted_total = 0u64;
        for chunk in recipients.chunks(self.batch_size) {
            let broadcast_id = broadcast.id;
            let now = Utc::now();
            let chunk = chunk.to_vec();

            let inserted = Arc::new(AtomicU64::new(0));
            {
                let inserted = Arc::clone(&inserted);
                self.outbox
                    .publish_with_state(&[], move |conn| {
                        Box::pin(async move {
                            StatisticsRepository::ensure(conn, broadcast_id, now).await?;
                            let n = DeliveryRepository::insert_pending_batch(
                                conn,
                                broadcast_id,
                                &chunk,
                                now,
                            )
                            .await?;
                            #[allow(clippy::cast_possible_wrap)]
                            StatisticsRepository::add_targeted(conn, broadcast_id, n as i64, now)
                                .await?;
                            inserted.store(n, Ordering::Relaxed);
                            Ok(())
                        })
                    })
                    .await?;
            }
            inserted_total += inserted.load(Ordering::Relaxed);
        }

        if inserted_total > 0 {
            tracing::info!(
                broadcast_id = %broadcast.id,
                recipients = recipients.len(),
                materialized = inserted_total,
                "Targets precomputed"
            );
            metrics::counter!("herald.targeting.materialized").increment(inserted_total);
        }

        Ok((recipients, inserted_total))
    }
}
