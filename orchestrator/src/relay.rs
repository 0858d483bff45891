//! The outbox relay (C2).
//!
//! One worker per node competes for the `outbox-relay` lock each drain
//! tick; the winner loops: open transaction → `read_batch(N)` →
//! publish each row to the bus (key = aggregate id, topic = row topic) →
//! delete the published ids → commit. `FOR UPDATE SKIP LOCKED` inside the
//! transaction means a concurrent winner on another lock name can never
//! double-drain a row, and the lock's `lock_at_least`/`lock_at_most` bounds
//! prevent split-brain across nodes.
//!
//! If a publish fails the transaction rolls back, the rows stay put, and
//! the relay sleeps a linearly-growing backoff. If the delete's commit
//! fails after a successful publish, the next drain re-publishes; the
//! consumers are idempotent by event id.

use crate::backoff::Backoff;
use crate::error::OrchestratorError;
use chrono::Duration as ChronoDuration;
use herald_core::bus::EventBus;
use herald_postgres::{Outbox, SchedulerLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

const LOCK_NAME: &str = "outbox-relay";

/// Relay tunables. Batch size is the only real knob.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Rows drained per transaction.
    pub batch_size: i64,
    /// Sleep between drain ticks when the outbox is empty.
    pub drain_interval: Duration,
    /// Minimum lock hold per tick (split-brain guard).
    pub lock_at_least: Duration,
    /// Lock auto-release bound (crash guard).
    pub lock_at_most: Duration,
    /// Backoff cap for bus errors.
    pub max_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            drain_interval: Duration::from_secs(1),
            lock_at_least: Duration::from_millis(500),
            lock_at_most: Duration::from_secs(30),
            max_backoff: Duration::from_secs(10),
        }
    }
}

enum TickOutcome {
    /// Another node holds the lock.
    Lost,
    /// Drained to empty.
    Drained,
}

/// Drains the transactional outbox onto the bus.
pub struct OutboxRelay {
    outbox: Outbox,
    bus: Arc<dyn EventBus>,
    lock: SchedulerLock,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Wire up the relay.
    #[must_use]
    pub const fn new(
        outbox: Outbox,
        bus: Arc<dyn EventBus>,
        lock: SchedulerLock,
        config: RelayConfig,
    ) -> Self {
        Self {
            outbox,
            bus,
            lock,
            config,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::linear(Duration::from_millis(200), self.config.max_backoff);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep_for = match self.tick().await {
                Ok(TickOutcome::Drained | TickOutcome::Lost) => {
                    backoff.reset();
                    self.config.drain_interval
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis(),
                        "Outbox drain failed, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Outbox relay stopped");
    }

    /// One drain tick: win the lock, then drain batches until the outbox is
    /// empty.
    async fn tick(&self) -> Result<TickOutcome, OrchestratorError> {
        let at_least = ChronoDuration::from_std(self.config.lock_at_least)
            .unwrap_or_else(|_| ChronoDuration::milliseconds(500));
        let at_most = ChronoDuration::from_std(self.config.lock_at_most)
            .unwrap_or_else(|_| ChronoDuration::seconds(30));

        let Some(guard) = self.lock.try_acquire(LOCK_NAME, at_least, at_most).await? else {
            return Ok(TickOutcome::Lost);
        };

        let result = self.drain_pending().await;

        if let Err(e) = guard.release().await {
            tracing::warn!(error = %e, "Relay lock release failed (will expire)");
        }
        result?;
        Ok(TickOutcome::Drained)
    }

    /// Drain batches until the outbox is empty. Public so shutdown can
    /// flush without waiting for a tick; production drains go through
    /// [`run`](Self::run), which holds the single-winner lock.
    ///
    /// # Errors
    ///
    /// Returns the first store or bus error; undrained rows stay put.
    pub async fn drain_pending(&self) -> Result<(), OrchestratorError> {
        loop {
            let mut tx = self.outbox.begin().await?;
            let batch = Outbox::read_batch(&mut tx, self.config.batch_size).await?;
            if batch.is_empty() {
                tx.commit().await.map_err(herald_postgres::StoreError::from)?;
                return Ok(());
            }

            let count = batch.len();
            let mut ids: Vec<Uuid> = Vec::with_capacity(count);
            for event in &batch {
                // On publish failure the transaction drops (rolls back) and
                // every row of this batch is retried on the next tick.
                self.bus
                    .publish(&event.topic, &event.aggregate_id, &event.payload)
                    .await?;
                ids.push(event.id);
            }

            Outbox::delete(&mut tx, &ids).await?;
            tx.commit().await.map_err(herald_postgres::StoreError::from)?;

            metrics::counter!("herald.relay.published").increment(count as u64);
            tracing::debug!(published = count, "Outbox batch relayed");

            #[allow(clippy::cast_possible_wrap)]
            if (count as i64) < self.config.batch_size {
                return Ok(()); // Short batch: the table is (momentarily) empty.
            }
        }
    }
}
