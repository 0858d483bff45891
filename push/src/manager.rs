//! The per-node connection pool.
//!
//! `PushSessionManager` owns every open connection on this node: a map from
//! recipient id to connections, the registry/mirror writes that make those
//! connections discoverable, the connect-time inbox replay, the heartbeat
//! loop, and the shutdown drain.

use crate::connection::{EnqueueOutcome, PushConnection};
use crate::error::PushError;
use chrono::Utc;
use herald_core::envelope::{EventEnvelope, EventKind};
use herald_core::frame::PushFrame;
use herald_core::inbox::InboxEntry;
use herald_core::outbox::OutboxEvent;
use herald_core::registry::SessionRegistry;
use herald_core::session::SessionRecord;
use herald_postgres::{DeliveryRepository, Outbox, SessionMirror};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

/// Tunables for the push layer.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// This node's id.
    pub node_id: String,
    /// This node's cluster id.
    pub cluster_id: String,
    /// The orchestration topic `DELIVERY.DELIVERED` envelopes go to.
    pub topic: String,
    /// Outbound queue capacity per connection (K).
    pub queue_capacity: usize,
    /// Grace a full queue gets before a frame is dropped.
    pub flush_timeout: Duration,
    /// Overflows tolerated inside the window before force-close (M).
    pub overflow_limit: usize,
    /// The rolling overflow window.
    pub overflow_window: Duration,
    /// Heartbeat frame cadence; also drives the registry refresh.
    pub heartbeat_interval: Duration,
    /// How long the shutdown drain waits for queues to empty.
    pub drain_grace: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".into(),
            cluster_id: "herald".into(),
            topic: "herald.orchestration".into(),
            queue_capacity: 256,
            flush_timeout: Duration::from_secs(2),
            overflow_limit: 5,
            overflow_window: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            drain_grace: Duration::from_secs(10),
        }
    }
}

/// The pool of live connections owned by this node.
pub struct PushSessionManager {
    config: PushConfig,
    connections: RwLock<HashMap<String, Vec<Arc<PushConnection>>>>,
    registry: Arc<dyn SessionRegistry>,
    mirror: SessionMirror,
    deliveries: DeliveryRepository,
    outbox: Outbox,
    draining: AtomicBool,
}

impl PushSessionManager {
    /// Wire up the manager.
    #[must_use]
    pub fn new(
        config: PushConfig,
        registry: Arc<dyn SessionRegistry>,
        mirror: SessionMirror,
        deliveries: DeliveryRepository,
        outbox: Outbox,
    ) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            registry,
            mirror,
            deliveries,
            outbox,
            draining: AtomicBool::new(false),
        }
    }

    /// This node's id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Open a connection for `recipient_id`: register it, send `CONNECTED`,
    /// replay the pending inbox, and hand the frame stream to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Draining`] during shutdown and
    /// [`PushError::Store`] when registration fails (the client should
    /// reconnect, likely landing on another node).
    pub async fn connect(
        &self,
        recipient_id: &str,
    ) -> Result<(Uuid, mpsc::Receiver<PushFrame>), PushError> {
        if self.draining.load(Ordering::Acquire) {
            return Err(PushError::Draining);
        }

        let (connection, receiver) = PushConnection::open(
            recipient_id,
            self.config.queue_capacity,
            self.config.flush_timeout,
            self.config.overflow_limit,
            self.config.overflow_window,
        );
        let connection = Arc::new(connection);
        let connection_id = connection.connection_id;
        let now = Utc::now();

        let session = SessionRecord::open(
            recipient_id,
            connection_id,
            &self.config.node_id,
            &self.config.cluster_id,
            now,
        );
        self.registry
            .register(&session)
            .await
            .map_err(|e| PushError::Store(e.to_string()))?;
        self.mirror
            .record_connect(&session)
            .await
            .map_err(|e| PushError::Store(e.to_string()))?;

        self.connections
            .write()
            .await
            .entry(recipient_id.to_string())
            .or_default()
            .push(Arc::clone(&connection));

        metrics::gauge!("herald.push.connections").increment(1.0);
        tracing::info!(
            recipient_id = recipient_id,
            connection_id = %connection_id,
            node_id = %self.config.node_id,
            "Push connection opened"
        );

        // CONNECTED first, then the catch-up replay, oldest first; the
        // queue preserves this order on the wire.
        let _ = connection.enqueue(PushFrame::connected(connection_id, now)).await;
        self.replay_pending(&connection).await?;

        Ok((connection_id, receiver))
    }

    /// Drain the recipient's pending rows into a fresh connection and emit
    /// the matching `DELIVERY.DELIVERED` envelopes through the outbox.
    async fn replay_pending(&self, connection: &Arc<PushConnection>) -> Result<(), PushError> {
        let pending = self
            .deliveries
            .pending_for(&connection.recipient_id)
            .await
            .map_err(|e| PushError::Store(e.to_string()))?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut delivered = Vec::new();
        for row in &pending {
            let now = Utc::now();
            let frame = PushFrame::message(&row.to_entry(), now);
            match connection.enqueue(frame).await {
                Ok(EnqueueOutcome::Sent) => {
                    let envelope = EventEnvelope::new(
                        EventKind::DeliveryDelivered,
                        row.delivery.broadcast_id,
                        now,
                        &row.correlation_id,
                    )
                    .for_recipient(&connection.recipient_id);
                    let event = OutboxEvent::from_envelope(&self.config.topic, &envelope)
                        .map_err(|e| PushError::Store(e.to_string()))?;
                    delivered.push(event);
                }
                // Saturated or closed mid-replay: the remaining rows stay
                // PENDING and surface on the next connect.
                Ok(EnqueueOutcome::Dropped | EnqueueOutcome::DroppedSlow) | Err(_) => break,
            }
        }

        if !delivered.is_empty() {
            let count = delivered.len();
            self.outbox
                .publish_with_state(&delivered, |_conn| Box::pin(async { Ok(()) }))
                .await
                .map_err(|e| PushError::Store(e.to_string()))?;
            tracing::debug!(
                recipient_id = %connection.recipient_id,
                replayed = count,
                "Pending inbox replayed into connection"
            );
        }
        Ok(())
    }

    /// Push one message to every local connection of `recipient_id`.
    ///
    /// A successful enqueue on at least one connection emits
    /// `DELIVERY.DELIVERED`; a recipient whose every connection dropped the
    /// frame gets the row marked `FAILED` (it still surfaces on reconnect).
    /// Slow connections are force-closed.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Store`] when the outbox write fails; the bus
    /// message is then retried by its consumer.
    pub async fn dispatch_message(
        &self,
        recipient_id: &str,
        entry: &InboxEntry,
        correlation_id: &str,
    ) -> Result<(), PushError> {
        let connections = self.connections_of(recipient_id).await;
        if connections.is_empty() {
            // Raced a disconnect: the row stays PENDING for the next connect.
            return Ok(());
        }

        let now = Utc::now();
        let mut any_sent = false;
        let mut slow = Vec::new();
        for connection in &connections {
            match connection.enqueue(PushFrame::message(entry, now)).await {
                Ok(EnqueueOutcome::Sent) => any_sent = true,
                Ok(EnqueueOutcome::Dropped) => {}
                Ok(EnqueueOutcome::DroppedSlow) => slow.push(connection.connection_id),
                Err(_) => {}
            }
        }

        if any_sent {
            let envelope = EventEnvelope::new(
                EventKind::DeliveryDelivered,
                entry.broadcast_id,
                now,
                correlation_id,
            )
            .for_recipient(recipient_id);
            let event = OutboxEvent::from_envelope(&self.config.topic, &envelope)
                .map_err(|e| PushError::Store(e.to_string()))?;
            self.outbox
                .publish_with_state(std::slice::from_ref(&event), |_conn| {
                    Box::pin(async { Ok(()) })
                })
                .await
                .map_err(|e| PushError::Store(e.to_string()))?;
            metrics::counter!("herald.push.delivered").increment(1);
        } else {
            // Every queue was saturated: record the failure durably.
            let broadcast_id = entry.broadcast_id;
            let recipient = recipient_id.to_string();
            self.outbox
                .publish_with_state(&[], move |conn| {
                    Box::pin(async move {
                        if DeliveryRepository::mark_failed(conn, broadcast_id, &recipient, now)
                            .await?
                        {
                            herald_postgres::StatisticsRepository::record_failed(
                                conn,
                                broadcast_id,
                                now,
                            )
                            .await?;
                        }
                        Ok(())
                    })
                })
                .await
                .map_err(|e| PushError::Store(e.to_string()))?;
            tracing::warn!(
                recipient_id = recipient_id,
                broadcast_id = %entry.broadcast_id,
                "All connections saturated, delivery marked failed"
            );
        }

        for connection_id in slow {
            self.close(connection_id, "slow consumer").await;
        }
        Ok(())
    }

    /// Fan a `MESSAGE_REMOVED` frame out to every local connection.
    pub async fn notify_removed(&self, broadcast_id: Uuid) {
        let now = Utc::now();
        let all: Vec<Arc<PushConnection>> = {
            let map = self.connections.read().await;
            map.values().flatten().cloned().collect()
        };
        for connection in all {
            let _ = connection
                .enqueue(PushFrame::message_removed(broadcast_id, now))
                .await;
        }
    }

    /// Send a `READ_RECEIPT` frame to the recipient's local connections
    /// (cross-device read sync).
    pub async fn notify_read(&self, recipient_id: &str, broadcast_id: Uuid) {
        let now = Utc::now();
        for connection in self.connections_of(recipient_id).await {
            let _ = connection
                .enqueue(PushFrame::read_receipt(broadcast_id, now))
                .await;
        }
    }

    /// Close one connection: drop it locally, deregister, mirror the
    /// disconnect. Pending queue contents are lost with the channel; the
    /// rows they came from are only stamped after a successful enqueue, so
    /// nothing is lost durably.
    pub async fn close(&self, connection_id: Uuid, cause: &str) {
        let mut removed = false;
        {
            let mut map = self.connections.write().await;
            for connections in map.values_mut() {
                let before = connections.len();
                connections.retain(|c| c.connection_id != connection_id);
                removed |= connections.len() != before;
            }
            map.retain(|_, v| !v.is_empty());
        }
        if !removed {
            return;
        }

        let now = Utc::now();
        if let Err(e) = self.registry.remove(&[connection_id]).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Registry removal failed");
        }
        if let Err(e) = self.mirror.record_disconnect(&[connection_id], now).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Session mirror update failed");
        }

        metrics::gauge!("herald.push.connections").decrement(1.0);
        tracing::info!(connection_id = %connection_id, cause = cause, "Push connection closed");
    }

    /// The heartbeat loop: periodic `HEARTBEAT` frames to every connection,
    /// registry refresh for all of them, and local cleanup of connections
    /// whose client went away. Runs until the shutdown signal flips.
    pub async fn run_heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.heartbeat_tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(node_id = %self.config.node_id, "Heartbeat loop stopped");
    }

    async fn heartbeat_tick(&self) {
        let now = Utc::now();
        let all: Vec<Arc<PushConnection>> = {
            let map = self.connections.read().await;
            map.values().flatten().cloned().collect()
        };

        let mut live = Vec::with_capacity(all.len());
        let mut dead = Vec::new();
        for connection in &all {
            if connection.is_open() {
                let _ = connection.enqueue(PushFrame::heartbeat(now)).await;
                live.push(connection.connection_id);
            } else {
                dead.push(connection.connection_id);
            }
        }

        if let Err(e) = self.registry.heartbeat(&self.config.node_id, &live).await {
            tracing::warn!(error = %e, "Registry heartbeat failed");
        }
        if let Err(e) = self.mirror.record_heartbeat(&live, now).await {
            tracing::warn!(error = %e, "Session mirror heartbeat failed");
        }
        for connection_id in dead {
            self.close(connection_id, "client disconnected").await;
        }

        // Cluster-wide visibility: how many sessions this node carries vs.
        // the whole registry.
        #[allow(clippy::cast_precision_loss)]
        if let (Ok(node_sessions), Ok(total_sessions)) = (
            self.registry.count_by_node(&self.config.node_id).await,
            self.registry.count_total().await,
        ) {
            metrics::gauge!("herald.sessions.node").set(node_sessions as f64);
            metrics::gauge!("herald.sessions.total").set(total_sessions as f64);
        }
    }

    /// Shutdown drain: refuse new connects, give queues one grace period to
    /// flush, then deregister everything.
    pub async fn drain(&self) {
        self.draining.store(true, Ordering::Release);
        tracing::info!(node_id = %self.config.node_id, "Push layer draining");

        tokio::time::sleep(self.config.drain_grace).await;

        let ids: Vec<Uuid> = {
            let mut map = self.connections.write().await;
            let ids = map
                .values()
                .flatten()
                .map(|c| c.connection_id)
                .collect();
            map.clear();
            ids
        };
        if ids.is_empty() {
            return;
        }

        let now = Utc::now();
        if let Err(e) = self.registry.remove(&ids).await {
            tracing::warn!(error = %e, "Registry removal during drain failed");
        }
        if let Err(e) = self.mirror.record_disconnect(&ids, now).await {
            tracing::warn!(error = %e, "Session mirror disconnect during drain failed");
        }
        tracing::info!(closed = ids.len(), "Push layer drained");
    }

    /// Open connection count on this node.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.values().map(Vec::len).sum()
    }

    async fn connections_of(&self, recipient_id: &str) -> Vec<Arc<PushConnection>> {
        self.connections
            .read()
            .await
            .get(recipient_id)
            .cloned()
            .unwrap_or_default()
    }
}
