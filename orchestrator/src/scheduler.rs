//! The lifecycle scheduler (C7).
//!
//! Periodic jobs, each guarded by its own cluster-wide single-winner lock
//! with `lock_at_least` covering most of the tick and `lock_at_most` just
//! below it:
//!
//! - **scheduled-activator**: precompute targets for broadcasts inside the
//!   prefetch window; flip due `SCHEDULED` rows to `ACTIVE` and emit
//!   `BROADCAST.CREATED` through the outbox.
//! - **expiration-sweeper**: `ACTIVE` past `expires_at` → `BROADCAST.EXPIRED`.
//! - **stale-session-sweeper**: evict registry sessions whose heartbeat
//!   predates the stale threshold.
//! - **inbox-cache-cleaner**: shuffle the cached keys and evict down to the
//!   configured bound (approximate random eviction).
//! - **session-purge** (daily): delete disconnected session mirror rows
//!   and dead letters older than their retention windows.
//!
//! Jobs never fail the loop: an erroring tick logs and retries at the next
//! interval. A directory outage in the activator leaves the broadcast
//! `SCHEDULED`, precisely so the next tick retries it.

use crate::error::OrchestratorError;
use crate::targeting::TargetPlanner;
use chrono::{Duration as ChronoDuration, Utc};
use herald_core::broadcast::BroadcastStatus;
use herald_core::envelope::{EventEnvelope, EventKind};
use herald_core::inbox::InboxCache;
use herald_core::outbox::OutboxEvent;
use herald_core::registry::SessionRegistry;
use herald_postgres::{BroadcastRepository, DeadLetterStore, Outbox, SchedulerLock, SessionMirror};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Scheduler tunables. Defaults follow the production cadence.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// The orchestration topic lifecycle events are emitted to.
    pub topic: String,
    /// Tick for the activator and both sweepers.
    pub tick: Duration,
    /// How far ahead the activator pre-materializes targets.
    pub prefetch_window: Duration,
    /// A session is stale when its heartbeat is older than this.
    pub session_stale_threshold: Duration,
    /// Tick for the inbox-cache cleaner.
    pub inbox_cleanup_tick: Duration,
    /// Cached snapshots beyond this bound are evicted.
    pub inbox_cache_threshold: u64,
    /// Tick for the session purge.
    pub purge_tick: Duration,
    /// Disconnected sessions older than this are purged.
    pub session_retention: Duration,
    /// Dead-letter records older than this are purged.
    pub dlt_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            topic: "herald.orchestration".into(),
            tick: Duration::from_secs(60),
            prefetch_window: Duration::from_secs(30 * 60),
            session_stale_threshold: Duration::from_secs(90),
            inbox_cleanup_tick: Duration::from_secs(300),
            inbox_cache_threshold: 10_000,
            purge_tick: Duration::from_secs(24 * 60 * 60),
            session_retention: Duration::from_secs(3 * 24 * 60 * 60),
            dlt_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Runs the periodic lifecycle jobs.
pub struct Scheduler {
    lock: SchedulerLock,
    outbox: Outbox,
    broadcasts: BroadcastRepository,
    registry: Arc<dyn SessionRegistry>,
    mirror: SessionMirror,
    cache: Arc<dyn InboxCache>,
    dead_letters: DeadLetterStore,
    planner: Arc<TargetPlanner>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Wire up the scheduler.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub const fn new(
        lock: SchedulerLock,
        outbox: Outbox,
        broadcasts: BroadcastRepository,
        registry: Arc<dyn SessionRegistry>,
        mirror: SessionMirror,
        cache: Arc<dyn InboxCache>,
        dead_letters: DeadLetterStore,
        planner: Arc<TargetPlanner>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            lock,
            outbox,
            broadcasts,
            registry,
            mirror,
            cache,
            dead_letters,
            planner,
            config,
        }
    }

    /// Run all jobs until shutdown, each on its own cadence.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut lifecycle = tokio::time::interval(self.config.tick);
        let mut cleanup = tokio::time::interval(self.config.inbox_cleanup_tick);
        let mut purge = tokio::time::interval(self.config.purge_tick);
        lifecycle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = lifecycle.tick() => {
                    self.locked_tick("scheduled-activator", self.config.tick, Self::activate_due).await;
                    self.locked_tick("expiration-sweeper", self.config.tick, Self::sweep_expired).await;
                    self.locked_tick("stale-session-sweeper", self.config.tick, Self::sweep_stale_sessions).await;
                }
                _ = cleanup.tick() => {
                    self.locked_tick("inbox-cache-cleaner", self.config.inbox_cleanup_tick, Self::clean_inbox_cache).await;
                }
                _ = purge.tick() => {
                    self.locked_tick("session-purge", self.config.purge_tick, Self::purge_sessions).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Scheduler stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Run one job under its single-winner lock. `lock_at_least` is most of
    /// the tick, `lock_at_most` just below it, so exactly one node runs
    /// each tick and a crashed winner frees the next one.
    async fn locked_tick<F>(&self, name: &str, tick: Duration, job: F)
    where
        F: AsyncFn(&Self) -> Result<(), OrchestratorError>,
    {
        let at_least = ChronoDuration::from_std(tick.mul_f32(0.8))
            .unwrap_or_else(|_| ChronoDuration::seconds(48));
        let at_most = ChronoDuration::from_std(tick.mul_f32(0.95))
            .unwrap_or_else(|_| ChronoDuration::seconds(57));

        let guard = match self.lock.try_acquire(name, at_least, at_most).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return, // Another node won this tick.
            Err(e) => {
                tracing::warn!(job = name, error = %e, "Lock acquisition failed");
                return;
            }
        };

        if let Err(e) = job(self).await {
            tracing::error!(job = name, error = %e, "Scheduled job failed, retrying next tick");
        }
        if let Err(e) = guard.release().await {
            tracing::warn!(job = name, error = %e, "Lock release failed (will expire)");
        }
    }

    /// Precompute targets inside the prefetch window, then activate due
    /// broadcasts by flipping status and emitting `BROADCAST.CREATED`.
    async fn activate_due(&self) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        let prefetch_horizon = now
            + ChronoDuration::from_std(self.config.prefetch_window)
                .unwrap_or_else(|_| ChronoDuration::minutes(30));

        for broadcast in self.broadcasts.scheduled_until(prefetch_horizon).await? {
            // Pre-materialize rows so activation is cheap; idempotent on
            // the unique pair, so repeating per tick is harmless.
            if let Err(e) = self.planner.precompute_and_store(&broadcast).await {
                tracing::warn!(
                    broadcast_id = %broadcast.id,
                    error = %e,
                    "Target precomputation failed, retrying next tick"
                );
                continue;
            }

            if broadcast.scheduled_at.is_some_and(|at| at <= now) {
                let broadcast_id = broadcast.id;
                let envelope = EventEnvelope::new(
                    EventKind::BroadcastCreated,
                    broadcast_id,
                    now,
                    &broadcast.correlation_id,
                );
                let event = OutboxEvent::from_envelope(&self.config.topic, &envelope)?;
                self.outbox
                    .publish_with_state(std::slice::from_ref(&event), move |conn| {
                        Box::pin(async move {
                            BroadcastRepository::advance_status(
                                conn,
                                broadcast_id,
                                BroadcastStatus::Active,
                                now,
                            )
                            .await?;
                            Ok(())
                        })
                    })
                    .await?;
                tracing::info!(broadcast_id = %broadcast_id, "Scheduled broadcast activated");
            }
        }
        Ok(())
    }

    /// Emit `BROADCAST.EXPIRED` for every `ACTIVE` broadcast past its
    /// expiry. The consumer owns the terminal transition and the removal
    /// fan-out.
    async fn sweep_expired(&self) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        for broadcast in self.broadcasts.expired_active(now).await? {
            let envelope = EventEnvelope::new(
                EventKind::BroadcastExpired,
                broadcast.id,
                now,
                &broadcast.correlation_id,
            );
            let event = OutboxEvent::from_envelope(&self.config.topic, &envelope)?;
            self.outbox
                .publish_with_state(std::slice::from_ref(&event), |_conn| {
                    Box::pin(async { Ok(()) })
                })
                .await?;
            tracing::info!(broadcast_id = %broadcast.id, "Expiry emitted");
        }
        Ok(())
    }

    /// Evict sessions whose heartbeat predates the stale threshold, and
    /// mirror the disconnects.
    async fn sweep_stale_sessions(&self) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        let threshold = now
            - ChronoDuration::from_std(self.config.session_stale_threshold)
                .unwrap_or_else(|_| ChronoDuration::seconds(90));

        let stale = self
            .registry
            .stale_before(threshold.timestamp_millis())
            .await?;
        if stale.is_empty() {
            return Ok(());
        }

        self.registry.remove(&stale).await?;
        self.mirror.record_disconnect(&stale, now).await?;
        tracing::info!(evicted = stale.len(), "Stale sessions evicted");
        metrics::counter!("herald.sessions.evicted").increment(stale.len() as u64);
        Ok(())
    }

    /// If the shared inbox region exceeds its bound, evict randomly-chosen
    /// snapshots down to the bound: approximate LRU without per-read
    /// bookkeeping.
    async fn clean_inbox_cache(&self) -> Result<(), OrchestratorError> {
        let size = self.cache.count().await?;
        if size <= self.config.inbox_cache_threshold {
            return Ok(());
        }

        let excess = usize::try_from(size - self.config.inbox_cache_threshold).unwrap_or(0);
        let mut keys = self.cache.keys().await?;
        keys.shuffle(&mut rand::thread_rng());
        keys.truncate(excess);

        let victims = keys.len();
        self.cache.evict(&keys).await?;
        tracing::info!(
            size = size,
            threshold = self.config.inbox_cache_threshold,
            evicted = victims,
            "Inbox cache cleaned"
        );
        Ok(())
    }

    /// Drop disconnected session mirror rows and dead letters older than
    /// their retention windows.
    async fn purge_sessions(&self) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        let session_cutoff = now
            - ChronoDuration::from_std(self.config.session_retention)
                .unwrap_or_else(|_| ChronoDuration::days(3));
        let purged = self.mirror.purge_disconnected_before(session_cutoff).await?;
        if purged > 0 {
            tracing::info!(purged = purged, "Old session rows purged");
        }

        let dlt_cutoff = now
            - ChronoDuration::from_std(self.config.dlt_retention)
                .unwrap_or_else(|_| ChronoDuration::days(7));
        let dropped = self.dead_letters.delete_failed_before(dlt_cutoff).await?;
        if dropped > 0 {
            tracing::info!(dropped = dropped, "Expired dead letters purged");
        }
        Ok(())
    }
}
