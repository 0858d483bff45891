//! The shared inbox cache: per-recipient snapshots of deliverable messages.
//!
//! The cache is a cluster-visible write-through of the delivery rows so a
//! reconnecting recipient can pull quickly on any node. It is bounded: when
//! the number of cached recipients exceeds the configured threshold, the
//! cleaner job evicts randomly-chosen snapshots down to the threshold
//! (approximate LRU without per-read bookkeeping). A miss is never an error;
//! readers fall back to the database and refill.

use crate::broadcast::Priority;
use crate::delivery::{DeliveryStatus, ReadStatus, RecipientDelivery};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by inbox-cache operations.
#[derive(Error, Debug, Clone)]
pub enum InboxCacheError {
    /// The backing store is unreachable or failed mid-operation.
    #[error("Inbox cache unavailable: {0}")]
    Unavailable(String),

    /// A cached entry could not be decoded.
    #[error("Corrupt inbox entry: {0}")]
    Corrupt(String),
}

/// One message in a recipient's cached inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    /// The delivery-row id, surfaced to clients as the message id.
    pub message_id: Uuid,
    /// The broadcast behind the message.
    pub broadcast_id: Uuid,
    /// Message body.
    pub content: String,
    /// Display name of the sender.
    pub sender_name: String,
    /// Delivery urgency.
    pub priority: Priority,
    /// Free-form category label.
    pub category: Option<String>,
    /// Push outcome.
    pub delivery_status: DeliveryStatus,
    /// Acknowledgement state.
    pub read_status: ReadStatus,
    /// Fan-out time, epoch millis; the inbox sort key.
    pub created_at_epoch_milli: i64,
}

impl InboxEntry {
    /// Project a delivery row plus its broadcast display fields into an entry.
    #[must_use]
    pub fn from_delivery(
        delivery: &RecipientDelivery,
        content: impl Into<String>,
        sender_name: impl Into<String>,
        priority: Priority,
        category: Option<String>,
    ) -> Self {
        Self {
            message_id: delivery.id,
            broadcast_id: delivery.broadcast_id,
            content: content.into(),
            sender_name: sender_name.into(),
            priority,
            category,
            delivery_status: delivery.delivery_status,
            read_status: delivery.read_status,
            created_at_epoch_milli: delivery.created_at.timestamp_millis(),
        }
    }
}

/// Boxed future alias for cache operations (keeps the trait dyn-compatible).
pub type InboxCacheFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, InboxCacheError>> + Send + 'a>>;

/// Cluster-visible per-recipient inbox snapshots.
pub trait InboxCache: Send + Sync {
    /// The cached snapshot for a recipient, newest first. `None` is a miss
    /// (fall back to the database and [`fill`](Self::fill)).
    fn entries(&self, recipient_id: &str) -> InboxCacheFuture<'_, Option<Vec<InboxEntry>>>;

    /// Replace a recipient's snapshot wholesale.
    fn fill(&self, recipient_id: &str, entries: &[InboxEntry]) -> InboxCacheFuture<'_, ()>;

    /// Update the cached statuses of one message, if cached.
    fn update_status(
        &self,
        recipient_id: &str,
        broadcast_id: Uuid,
        delivery_status: DeliveryStatus,
        read_status: ReadStatus,
    ) -> InboxCacheFuture<'_, ()>;

    /// Drop a broadcast's entry from a recipient's snapshot, if cached.
    fn remove_broadcast(&self, recipient_id: &str, broadcast_id: Uuid) -> InboxCacheFuture<'_, ()>;

    /// Number of cached recipient snapshots.
    fn count(&self) -> InboxCacheFuture<'_, u64>;

    /// All cached recipient ids. The cleaner shuffles this set to pick
    /// eviction victims.
    fn keys(&self) -> InboxCacheFuture<'_, Vec<String>>;

    /// Evict the snapshots of the given recipients.
    fn evict(&self, recipient_ids: &[String]) -> InboxCacheFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn entry_projects_delivery_row() {
        let now = Utc::now();
        let delivery = RecipientDelivery::pending(Uuid::new_v4(), "u1", now);
        let entry = InboxEntry::from_delivery(
            &delivery,
            "hello",
            "Admin",
            Priority::High,
            Some("ops".into()),
        );
        assert_eq!(entry.message_id, delivery.id);
        assert_eq!(entry.broadcast_id, delivery.broadcast_id);
        assert_eq!(entry.delivery_status, DeliveryStatus::Pending);
        assert_eq!(entry.read_status, ReadStatus::Unread);
        assert_eq!(entry.created_at_epoch_milli, now.timestamp_millis());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn entry_serializes_camel_case() {
        let delivery = RecipientDelivery::pending(Uuid::new_v4(), "u1", Utc::now());
        let entry = InboxEntry::from_delivery(&delivery, "hi", "Admin", Priority::Normal, None);
        let json = serde_json::to_value(&entry).expect("serialize");
        assert!(json.get("messageId").is_some());
        assert!(json.get("createdAtEpochMilli").is_some());
        assert_eq!(json["deliveryStatus"], "PENDING");
    }
}
