//! The orchestration bus consumer (C3).
//!
//! Consumes the orchestration topic under the shared consumer group and
//! folds events into the read model. Handlers are idempotent by
//! construction: every write probes current state through a guarded SQL
//! transition and replayed events fall through as no-ops, so any bus
//! message can be redelivered without changing the final state.
//!
//! Failure routing: retryable errors get bounded linear backoff inside the
//! worker; exhausted (or poison) messages are persisted to the dead-letter
//! table and published to the topic's `.DLT` companion; only fatal errors
//! surface out of the loop, aborting the worker for the supervisor to
//! restart. Offsets are committed after the read-model write or the
//! dead-lettering, never before.
//!
//! Envelopes carrying a `node_id` (push work items, removal notices, read
//! receipts) belong to the per-node dispatcher groups and are committed
//! straight through here.

use crate::backoff::Backoff;
use crate::error::OrchestratorError;
use crate::targeting::TargetPlanner;
use chrono::Utc;
use herald_core::broadcast::{Broadcast, BroadcastStatus};
use herald_core::bus::{BusConsumer, BusMessage, EventBus, dead_letter_topic};
use herald_core::delivery::{DeliveryStatus, ReadStatus};
use herald_core::envelope::{EventEnvelope, EventKind};
use herald_core::error::{Classify, ErrorClass};
use herald_core::fault::FaultFlags;
use herald_core::inbox::InboxCache;
use herald_core::outbox::OutboxEvent;
use herald_core::registry::SessionRegistry;
use herald_postgres::{
    BroadcastRepository, DeadLetterStore, DeliveryRepository, Outbox, PreferencesRepository,
    StatisticsRepository,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Consumer tunables.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// The orchestration topic (its `.DLT` companion is derived).
    pub topic: String,
    /// Bounded retry attempts before dead-lettering.
    pub max_retries: u32,
    /// Base of the linear retry backoff.
    pub retry_base: Duration,
    /// Per-message processing deadline.
    pub processing_deadline: Duration,
    /// Recipients walked per page during fan-outs.
    pub fanout_page_size: i64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "herald.orchestration".into(),
            max_retries: 3,
            retry_base: Duration::from_millis(200),
            processing_deadline: Duration::from_secs(30),
            fanout_page_size: 500,
        }
    }
}

/// Folds orchestration events into the read model.
pub struct OrchestrationConsumer {
    consumer: Arc<dyn BusConsumer>,
    bus: Arc<dyn EventBus>,
    outbox: Outbox,
    broadcasts: BroadcastRepository,
    deliveries: DeliveryRepository,
    dead_letters: DeadLetterStore,
    registry: Arc<dyn SessionRegistry>,
    cache: Arc<dyn InboxCache>,
    flags: Arc<dyn FaultFlags>,
    preferences: PreferencesRepository,
    planner: Arc<TargetPlanner>,
    config: ConsumerConfig,
}

impl OrchestrationConsumer {
    /// Wire up the consumer. Collaborators come in through the constructor;
    /// there is no ambient state.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        consumer: Arc<dyn BusConsumer>,
        bus: Arc<dyn EventBus>,
        outbox: Outbox,
        broadcasts: BroadcastRepository,
        deliveries: DeliveryRepository,
        dead_letters: DeadLetterStore,
        registry: Arc<dyn SessionRegistry>,
        cache: Arc<dyn InboxCache>,
        flags: Arc<dyn FaultFlags>,
        preferences: PreferencesRepository,
        planner: Arc<TargetPlanner>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            consumer,
            bus,
            outbox,
            broadcasts,
            deliveries,
            dead_letters,
            registry,
            cache,
            flags,
            preferences,
            planner,
            config,
        }
    }

    /// Run until shutdown. Returns an error only on a fatal failure, which
    /// the supervisor treats as worker death.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`OrchestratorError`] that aborted the worker.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), OrchestratorError> {
        loop {
            tokio::select! {
                received = self.consumer.recv() => {
                    match received {
                        Ok(message) => self.process(&message).await?,
                        Err(e) => {
                            tracing::error!(error = %e, "Consumer receive failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Orchestration consumer stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Process one message end-to-end: decode, handle with bounded retries,
    /// dead-letter on exhaustion, commit last.
    async fn process(&self, message: &BusMessage) -> Result<(), OrchestratorError> {
        // Messages on the companion topic were captured to the dead-letter
        // table at failure time (that is what preserves their original
        // coordinates); here they are only acknowledged and counted.
        if message.topic == dead_letter_topic(&self.config.topic) {
            metrics::counter!("herald.consumer.dead_lettered_seen").increment(1);
            self.commit(message);
            return Ok(());
        }

        let envelope = match EventEnvelope::from_bytes(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Undecodable payload: no ids to work with, dead-letter as-is.
                tracing::error!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Poison message (not an envelope)"
                );
                self.dead_letter(message, Uuid::nil(), "unknown", &e.to_string())
                    .await?;
                self.commit(message);
                return Ok(());
            }
        };

        // Node-routed envelopes belong to the push dispatchers.
        if envelope.node_id.is_some()
            || matches!(
                envelope.event_type,
                EventKind::DeliveryPush | EventKind::BroadcastRemoved
            )
        {
            self.commit(message);
            return Ok(());
        }

        let mut backoff = Backoff::linear(self.config.retry_base, Duration::from_secs(10));
        loop {
            let outcome =
                tokio::time::timeout(self.config.processing_deadline, self.handle(&envelope)).await;

            let error = match outcome {
                Ok(Ok(())) => {
                    metrics::counter!(
                        "herald.consumer.processed",
                        "event_type" => envelope.event_type.as_str()
                    )
                    .increment(1);
                    break;
                }
                Ok(Err(e)) => e,
                Err(_elapsed) => OrchestratorError::Bus(herald_core::bus::BusError::Transport(
                    "processing deadline exceeded".into(),
                )),
            };

            match error.class() {
                ErrorClass::Fatal => {
                    tracing::error!(
                        event_id = %envelope.event_id,
                        error = %error,
                        "Fatal consumer error, aborting worker"
                    );
                    return Err(error);
                }
                ErrorClass::Retryable | ErrorClass::ExternalUnavailable
                    if backoff.attempts() < self.config.max_retries =>
                {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        event_id = %envelope.event_id,
                        event_type = envelope.event_type.as_str(),
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Event processing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    self.dead_letter(
                        message,
                        envelope.broadcast_id,
                        &envelope.correlation_id,
                        &error.to_string(),
                    )
                    .await?;
                    break;
                }
            }
        }

        self.commit(message);
        Ok(())
    }

    fn commit(&self, message: &BusMessage) {
        if let Err(e) = self.consumer.commit(message) {
            tracing::warn!(
                topic = %message.topic,
                offset = message.offset,
                error = %e,
                "Offset commit failed (message may be redelivered)"
            );
        }
    }

    /// Persist the failure and publish to the `.DLT` companion. Failing
    /// here propagates: the message stays uncommitted and is redelivered.
    async fn dead_letter(
        &self,
        message: &BusMessage,
        broadcast_id: Uuid,
        correlation_id: &str,
        cause: &str,
    ) -> Result<(), OrchestratorError> {
        self.dead_letters
            .add(
                broadcast_id,
                message.key.as_deref(),
                &message.topic,
                message.partition,
                message.offset,
                cause,
                &message.payload,
                correlation_id,
                Utc::now(),
            )
            .await?;

        let dlt = dead_letter_topic(&message.topic);
        self.bus
            .publish(&dlt, message.key.as_deref().unwrap_or(""), &message.payload)
            .await?;
        Ok(())
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), OrchestratorError> {
        match envelope.event_type {
            EventKind::BroadcastCreated => self.handle_created(envelope).await,
            EventKind::BroadcastCancelled => {
                self.handle_terminal(envelope, BroadcastStatus::Cancelled).await
            }
            EventKind::BroadcastExpired => {
                self.handle_terminal(envelope, BroadcastStatus::Expired).await
            }
            EventKind::DeliveryDelivered => self.handle_delivered(envelope).await,
            EventKind::DeliveryRead => self.handle_read(envelope).await,
            EventKind::RedriveRequested => self.handle_redrive(envelope).await,
            // Filtered in process(); kept for completeness.
            EventKind::DeliveryPush | EventKind::BroadcastRemoved => Ok(()),
        }
    }

    /// `BROADCAST.CREATED`: expand targets, materialize `PENDING` rows, and
    /// route a push work item to each recipient with a live session.
    /// Offline recipients get nothing pushed; their inbox surfaces the
    /// message on the next connect.
    async fn handle_created(&self, envelope: &EventEnvelope) -> Result<(), OrchestratorError> {
        let broadcast_id = envelope.broadcast_id;
        if self.flags.is_failing(broadcast_id).await? {
            return Err(OrchestratorError::Injected { broadcast_id });
        }

        let broadcast = self.broadcasts.get(broadcast_id).await?;
        let now = Utc::now();
        if broadcast.status != BroadcastStatus::Active || !broadcast.within_window(now) {
            tracing::debug!(
                broadcast_id = %broadcast_id,
                status = broadcast.status.as_str(),
                "Skipping fan-out for inactive broadcast"
            );
            return Ok(());
        }

        let (recipients, _materialized) = self.planner.precompute_and_store(&broadcast).await?;
        self.fan_out_pushes(&broadcast, &recipients).await
    }

    /// Build and durably enqueue `DELIVERY.PUSH` work items for every
    /// targeted recipient with a live session, skipping muted categories.
    async fn fan_out_pushes(
        &self,
        broadcast: &Broadcast,
        recipients: &[String],
    ) -> Result<(), OrchestratorError> {
        // Cached snapshots of targeted recipients are stale the moment the
        // rows exist; evict in batches and let the next read refill.
        let page = usize::try_from(self.config.fanout_page_size).unwrap_or(500);
        for chunk in recipients.chunks(page) {
            if let Err(e) = self.cache.evict(chunk).await {
                tracing::warn!(error = %e, "Inbox cache eviction failed");
            }
        }

        let mut work_items = Vec::new();
        let now = Utc::now();

        for recipient_id in recipients {
            let sessions = self.registry.lookup(recipient_id).await?;
            if sessions.is_empty() {
                continue;
            }

            let prefs = self.preferences.get(recipient_id, now).await?;
            if prefs.is_muted(broadcast.category.as_deref()) {
                continue; // Still lands in the inbox; no live push.
            }

            let row = self.deliveries.get(broadcast.id, recipient_id).await?;
            if row.delivery_status != DeliveryStatus::Pending {
                continue; // Replay: already pushed or superseded.
            }
            let entry = herald_core::inbox::InboxEntry::from_delivery(
                &row,
                broadcast.content.clone(),
                broadcast.sender_name.clone(),
                broadcast.priority,
                broadcast.category.clone(),
            );
            let payload = serde_json::to_value(&entry)
                .map_err(|e| herald_core::envelope::EnvelopeError::Encode(e.to_string()))?;

            let nodes: BTreeSet<String> =
                sessions.into_iter().map(|s| s.node_id).collect();
            for node_id in nodes {
                let push = EventEnvelope::new(
                    EventKind::DeliveryPush,
                    broadcast.id,
                    Utc::now(),
                    &broadcast.correlation_id,
                )
                .for_recipient(recipient_id.clone())
                .routed_to(node_id)
                .with_payload(payload.clone());
                work_items.push(OutboxEvent::from_envelope(&self.config.topic, &push)?);
            }
        }

        if work_items.is_empty() {
            return Ok(());
        }
        let count = work_items.len();
        for chunk in work_items.chunks(200) {
            self.outbox
                .publish_with_state(chunk, |_conn| Box::pin(async { Ok(()) }))
                .await?;
        }
        tracing::info!(
            broadcast_id = %broadcast.id,
            work_items = count,
            "Push work items enqueued"
        );
        Ok(())
    }

    /// `BROADCAST.CANCELLED` / `BROADCAST.EXPIRED`: mark the broadcast
    /// terminal (idempotent), supersede still-pending rows on cancellation,
    /// drop cached inbox entries, and notify every node with a connected
    /// recipient of this broadcast.
    async fn handle_terminal(
        &self,
        envelope: &EventEnvelope,
        next: BroadcastStatus,
    ) -> Result<(), OrchestratorError> {
        let broadcast_id = envelope.broadcast_id;
        let now = Utc::now();
        let cancelled = next == BroadcastStatus::Cancelled;

        self.outbox
            .publish_with_state(&[], |conn| {
                Box::pin(async move {
                    BroadcastRepository::advance_status(conn, broadcast_id, next, now).await?;
                    if cancelled {
                        let superseded =
                            DeliveryRepository::supersede_pending(conn, broadcast_id, now).await?;
                        if superseded > 0 {
                            tracing::info!(
                                broadcast_id = %broadcast_id,
                                superseded = superseded,
                                "Pending deliveries superseded"
                            );
                        }
                    }
                    Ok(())
                })
            })
            .await?;

        // Walk the targeted recipients: drop their cached entries and
        // collect the nodes currently serving any of them.
        let mut nodes: BTreeSet<String> = BTreeSet::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .deliveries
                .recipients_of(broadcast_id, after.as_deref(), self.config.fanout_page_size)
                .await?;
            let Some(last) = page.last().cloned() else {
                break;
            };
            for recipient_id in &page {
                if let Err(e) = self.cache.remove_broadcast(recipient_id, broadcast_id).await {
                    tracing::warn!(recipient_id = %recipient_id, error = %e, "Cache removal failed");
                }
                for session in self.registry.lookup(recipient_id).await? {
                    nodes.insert(session.node_id);
                }
            }
            after = Some(last);
        }

        if nodes.is_empty() {
            return Ok(());
        }
        let removals: Vec<OutboxEvent> = nodes
            .into_iter()
            .map(|node_id| {
                let removal = EventEnvelope::new(
                    EventKind::BroadcastRemoved,
                    broadcast_id,
                    Utc::now(),
                    &envelope.correlation_id,
                )
                .routed_to(node_id);
                OutboxEvent::from_envelope(&self.config.topic, &removal)
            })
            .collect::<Result<_, _>>()?;
        self.outbox
            .publish_with_state(&removals, |_conn| Box::pin(async { Ok(()) }))
            .await?;
        Ok(())
    }

    /// `DELIVERY.DELIVERED`: first transition stamps the row and the
    /// statistics; replays are no-ops. A fire-and-forget broadcast expires
    /// in the same transaction as its first delivery, bounding it to one.
    async fn handle_delivered(&self, envelope: &EventEnvelope) -> Result<(), OrchestratorError> {
        let recipient_id = envelope.recipient_id.clone().ok_or(
            OrchestratorError::MissingRecipient {
                event_id: envelope.event_id,
            },
        )?;
        let broadcast = self.broadcasts.get(envelope.broadcast_id).await?;
        let broadcast_id = broadcast.id;
        let fire_and_forget = broadcast.fire_and_forget;
        let delivered_at = envelope.timestamp;
        let now = Utc::now();
        let topic = self.config.topic.clone();
        let correlation_id = envelope.correlation_id.clone();

        let first = Arc::new(AtomicBool::new(false));
        {
            let recipient_id = recipient_id.clone();
            let first = Arc::clone(&first);
            self.outbox
                .publish_with_state(&[], move |conn| {
                    Box::pin(async move {
                        let Some(created_at) = DeliveryRepository::mark_delivered(
                            conn,
                            broadcast_id,
                            &recipient_id,
                            now,
                        )
                        .await?
                        else {
                            return Ok(()); // Already delivered or read.
                        };
                        first.store(true, Ordering::Relaxed);

                        #[allow(clippy::cast_precision_loss)]
                        let latency_ms = (delivered_at - created_at)
                            .num_milliseconds()
                            .max(0) as f64;
                        StatisticsRepository::ensure(conn, broadcast_id, now).await?;
                        StatisticsRepository::record_delivered(conn, broadcast_id, latency_ms, now)
                            .await?;

                        if fire_and_forget
                            && BroadcastRepository::advance_status(
                                conn,
                                broadcast_id,
                                BroadcastStatus::Expired,
                                now,
                            )
                            .await?
                        {
                            let expire = EventEnvelope::new(
                                EventKind::BroadcastExpired,
                                broadcast_id,
                                now,
                                &correlation_id,
                            );
                            let event = OutboxEvent::from_envelope(&topic, &expire)
                                .map_err(|e| herald_postgres::StoreError::Corrupt(e.to_string()))?;
                            Outbox::append(conn, std::slice::from_ref(&event)).await?;
                            tracing::info!(
                                broadcast_id = %broadcast_id,
                                "Fire-and-forget broadcast expired after first delivery"
                            );
                        }
                        Ok(())
                    })
                })
                .await?;
        }

        if first.load(Ordering::Relaxed) {
            if let Err(e) = self
                .cache
                .update_status(
                    &recipient_id,
                    broadcast_id,
                    DeliveryStatus::Delivered,
                    ReadStatus::Unread,
                )
                .await
            {
                tracing::warn!(recipient_id = %recipient_id, error = %e, "Cache status update failed");
            }
        }
        Ok(())
    }

    /// `DELIVERY.READ`: promote a still-pending row to delivered (a read
    /// message was necessarily received), stamp the read, update statistics
    /// on first transitions only, and sync the recipient's other sessions.
    async fn handle_read(&self, envelope: &EventEnvelope) -> Result<(), OrchestratorError> {
        let recipient_id = envelope.recipient_id.clone().ok_or(
            OrchestratorError::MissingRecipient {
                event_id: envelope.event_id,
            },
        )?;
        let broadcast_id = envelope.broadcast_id;
        let read_at = envelope.timestamp;
        let now = Utc::now();

        let read_first = Arc::new(AtomicBool::new(false));
        {
            let recipient_id = recipient_id.clone();
            let read_first = Arc::clone(&read_first);
            self.outbox
                .publish_with_state(&[], move |conn| {
                    Box::pin(async move {
                        if let Some(created_at) = DeliveryRepository::mark_delivered(
                            conn,
                            broadcast_id,
                            &recipient_id,
                            now,
                        )
                        .await?
                        {
                            #[allow(clippy::cast_precision_loss)]
                            let latency_ms =
                                (read_at - created_at).num_milliseconds().max(0) as f64;
                            StatisticsRepository::ensure(conn, broadcast_id, now).await?;
                            StatisticsRepository::record_delivered(
                                conn,
                                broadcast_id,
                                latency_ms,
                                now,
                            )
                            .await?;
                        }
                        if DeliveryRepository::mark_read(conn, broadcast_id, &recipient_id, now)
                            .await?
                        {
                            StatisticsRepository::record_read(conn, broadcast_id, now).await?;
                            read_first.store(true, Ordering::Relaxed);
                        }
                        Ok(())
                    })
                })
                .await?;
        }

        if !read_first.load(Ordering::Relaxed) {
            return Ok(()); // Replay.
        }

        if let Err(e) = self
            .cache
            .update_status(
                &recipient_id,
                broadcast_id,
                DeliveryStatus::Delivered,
                ReadStatus::Read,
            )
            .await
        {
            tracing::warn!(recipient_id = %recipient_id, error = %e, "Cache status update failed");
        }

        // Read receipts to every node serving this recipient.
        let sessions = self.registry.lookup(&recipient_id).await?;
        let nodes: BTreeSet<String> = sessions.into_iter().map(|s| s.node_id).collect();
        if nodes.is_empty() {
            return Ok(());
        }
        let receipts: Vec<OutboxEvent> = nodes
            .into_iter()
            .map(|node_id| {
                let receipt = EventEnvelope::new(
                    EventKind::DeliveryRead,
                    broadcast_id,
                    Utc::now(),
                    &envelope.correlation_id,
                )
                .for_recipient(recipient_id.clone())
                .routed_to(node_id);
                OutboxEvent::from_envelope(&self.config.topic, &receipt)
            })
            .collect::<Result<_, _>>()?;
        self.outbox
            .publish_with_state(&receipts, |_conn| Box::pin(async { Ok(()) }))
            .await?;
        Ok(())
    }

    /// `REDRIVE.REQUESTED`: reset the delivery row to `PENDING` (the one
    /// sanctioned regression) and re-enqueue a push work item for any live
    /// session, so the normal path finishes the job.
    async fn handle_redrive(&self, envelope: &EventEnvelope) -> Result<(), OrchestratorError> {
        let recipient_id = envelope.recipient_id.clone().ok_or(
            OrchestratorError::MissingRecipient {
                event_id: envelope.event_id,
            },
        )?;
        let broadcast = self.broadcasts.get(envelope.broadcast_id).await?;
        let broadcast_id = broadcast.id;
        let now = Utc::now();

        {
            let recipient_id = recipient_id.clone();
            self.outbox
                .publish_with_state(&[], move |conn| {
                    Box::pin(async move {
                        DeliveryRepository::reset_for_redrive(conn, broadcast_id, &recipient_id, now)
                            .await
                    })
                })
                .await?;
        }

        if let Err(e) = self
            .cache
            .update_status(
                &recipient_id,
                broadcast_id,
                DeliveryStatus::Pending,
                ReadStatus::Unread,
            )
            .await
        {
            tracing::warn!(recipient_id = %recipient_id, error = %e, "Cache status update failed");
        }

        if broadcast.status != BroadcastStatus::Active {
            return Ok(()); // Terminal broadcast: the row waits for a pull.
        }
        self.fan_out_pushes(&broadcast, std::slice::from_ref(&recipient_id))
            .await
    }
}
