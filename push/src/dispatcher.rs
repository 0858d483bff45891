//! The per-node bus dispatcher.
//!
//! Every node runs this consumer under its own consumer group
//! (`herald-push-{node_id}`), so each node sees every envelope on the
//! orchestration topic. Only node-routed work is acted on:
//!
//! - `DELIVERY.PUSH` addressed to this node → `MESSAGE` frame
//! - `DELIVERY.READ` addressed to this node → `READ_RECEIPT` frame
//! - `BROADCAST.REMOVED` addressed to this node or to all →
//!   `MESSAGE_REMOVED` frame
//!
//! Everything else belongs to the shared orchestration group and is
//! committed straight through. Push failures never dead-letter: a frame
//! that could not be enqueued leaves its delivery row `PENDING`, which the
//! next reconnect drains.

use crate::manager::PushSessionManager;
use herald_core::bus::{BusConsumer, BusMessage};
use herald_core::envelope::{EventEnvelope, EventKind};
use herald_core::inbox::InboxEntry;
use std::sync::Arc;
use tokio::sync::watch;

/// Translates node-routed envelopes into wire frames.
pub struct PushDispatcher {
    consumer: Arc<dyn BusConsumer>,
    manager: Arc<PushSessionManager>,
}

impl PushDispatcher {
    /// Wire up the dispatcher. `consumer` must be subscribed with this
    /// node's private consumer group.
    #[must_use]
    pub fn new(consumer: Arc<dyn BusConsumer>, manager: Arc<PushSessionManager>) -> Self {
        Self { consumer, manager }
    }

    /// Run until the shutdown signal flips. Every message is committed,
    /// handled or not; the durable delivery state lives in Postgres, not
    /// in bus offsets.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                received = self.consumer.recv() => {
                    match received {
                        Ok(message) => {
                            self.handle(&message).await;
                            if let Err(e) = self.consumer.commit(&message) {
                                tracing::warn!(
                                    topic = %message.topic,
                                    offset = message.offset,
                                    error = %e,
                                    "Dispatcher commit failed (message may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Dispatcher receive failed");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(node_id = self.manager.node_id(), "Push dispatcher stopped");
    }

    async fn handle(&self, message: &BusMessage) {
        let envelope = match EventEnvelope::from_bytes(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Poison payloads are the orchestration group's problem;
                // the dispatcher just moves on.
                tracing::debug!(error = %e, "Dispatcher skipping undecodable message");
                return;
            }
        };

        let for_this_node = envelope.node_id.as_deref() == Some(self.manager.node_id());
        let for_all_nodes = envelope.node_id.is_none();

        match envelope.event_type {
            EventKind::DeliveryPush if for_this_node => {
                let Some(recipient_id) = envelope.recipient_id.clone() else {
                    tracing::warn!(event_id = %envelope.event_id, "PUSH without recipient");
                    return;
                };
                let entry: InboxEntry = match serde_json::from_value(envelope.payload.clone()) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(
                            event_id = %envelope.event_id,
                            error = %e,
                            "PUSH payload is not an inbox entry"
                        );
                        return;
                    }
                };
                if let Err(e) = self
                    .manager
                    .dispatch_message(&recipient_id, &entry, &envelope.correlation_id)
                    .await
                {
                    tracing::warn!(
                        recipient_id = %recipient_id,
                        broadcast_id = %envelope.broadcast_id,
                        error = %e,
                        "Push dispatch failed; row stays pending"
                    );
                }
            }
            EventKind::DeliveryRead if for_this_node => {
                if let Some(recipient_id) = envelope.recipient_id.as_deref() {
                    self.manager
                        .notify_read(recipient_id, envelope.broadcast_id)
                        .await;
                }
            }
            EventKind::BroadcastRemoved if for_this_node || for_all_nodes => {
                self.manager.notify_removed(envelope.broadcast_id).await;
            }
            _ => {} // The shared orchestration group owns the rest.
        }
    }
}
