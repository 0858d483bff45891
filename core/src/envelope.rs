//! The bus message envelope.
//!
//! Every message on the orchestration topic is one JSON [`EventEnvelope`].
//! Envelopes are produced into the transactional outbox and forwarded to the
//! bus verbatim by the relay; consumers deduplicate by `event_id` and the
//! read-model probes described in each handler.
//!
//! Partitioning: the envelope's [`partition_key`](EventEnvelope::partition_key)
//! is the recipient id for delivery-aggregate events and the broadcast id for
//! broadcast-aggregate events, so all events of one recipient share a
//! partition and arrive in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The payload bytes are not a valid envelope.
    #[error("Failed to decode envelope: {0}")]
    Decode(String),

    /// The envelope could not be serialized.
    #[error("Failed to encode envelope: {0}")]
    Encode(String),
}

/// Which aggregate an event belongs to. Determines the partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateType {
    /// Broadcast lifecycle events, keyed by broadcast id.
    Broadcast,
    /// Per-recipient delivery events, keyed by recipient id.
    Delivery,
    /// Recipient-initiated events (read receipts), keyed by recipient id.
    User,
}

impl AggregateType {
    /// Stable database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "BROADCAST",
            Self::Delivery => "DELIVERY",
            Self::User => "USER",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        match s {
            "BROADCAST" => Ok(Self::Broadcast),
            "DELIVERY" => Ok(Self::Delivery),
            "USER" => Ok(Self::User),
            other => Err(EnvelopeError::Decode(format!("unknown aggregate type: {other}"))),
        }
    }
}

/// The closed set of event kinds carried on the orchestration topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A broadcast was created (or a scheduled one activated).
    #[serde(rename = "BROADCAST.CREATED")]
    BroadcastCreated,
    /// A broadcast was withdrawn before or during its active window.
    #[serde(rename = "BROADCAST.CANCELLED")]
    BroadcastCancelled,
    /// A broadcast passed its expiry (or fire-and-forget delivered once).
    #[serde(rename = "BROADCAST.EXPIRED")]
    BroadcastExpired,
    /// Node-routed removal notice for a terminal broadcast.
    #[serde(rename = "BROADCAST.REMOVED")]
    BroadcastRemoved,
    /// Node-routed work item: push one message to one recipient.
    #[serde(rename = "DELIVERY.PUSH")]
    DeliveryPush,
    /// A message reached its recipient.
    #[serde(rename = "DELIVERY.DELIVERED")]
    DeliveryDelivered,
    /// A recipient acknowledged a message.
    #[serde(rename = "DELIVERY.READ")]
    DeliveryRead,
    /// An operator requested replay of a dead-lettered delivery.
    #[serde(rename = "REDRIVE.REQUESTED")]
    RedriveRequested,
}

impl EventKind {
    /// Stable database/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BroadcastCreated => "BROADCAST.CREATED",
            Self::BroadcastCancelled => "BROADCAST.CANCELLED",
            Self::BroadcastExpired => "BROADCAST.EXPIRED",
            Self::BroadcastRemoved => "BROADCAST.REMOVED",
            Self::DeliveryPush => "DELIVERY.PUSH",
            Self::DeliveryDelivered => "DELIVERY.DELIVERED",
            Self::DeliveryRead => "DELIVERY.READ",
            Self::RedriveRequested => "REDRIVE.REQUESTED",
        }
    }

    /// The aggregate this kind of event belongs to.
    #[must_use]
    pub const fn aggregate_type(&self) -> AggregateType {
        match self {
            Self::BroadcastCreated
            | Self::BroadcastCancelled
            | Self::BroadcastExpired
            | Self::BroadcastRemoved => AggregateType::Broadcast,
            Self::DeliveryPush | Self::DeliveryDelivered | Self::RedriveRequested => {
                AggregateType::Delivery
            }
            Self::DeliveryRead => AggregateType::User,
        }
    }
}

/// One message on the orchestration topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique per event; consumers deduplicate on it.
    pub event_id: Uuid,
    /// The broadcast this event concerns.
    pub broadcast_id: Uuid,
    /// Set for delivery-aggregate and user-aggregate events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    /// Set when the event is routed to one serving node; absent means
    /// every node's dispatcher handles it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Event kind.
    pub event_type: EventKind,
    /// UTC event time.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Stable across retries of the same logical operation.
    pub correlation_id: String,
}

impl EventEnvelope {
    /// Build an envelope with a fresh event id.
    #[must_use]
    pub fn new(
        event_type: EventKind,
        broadcast_id: Uuid,
        timestamp: DateTime<Utc>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            broadcast_id,
            recipient_id: None,
            node_id: None,
            event_type,
            timestamp,
            payload: serde_json::Value::Null,
            correlation_id: correlation_id.into(),
        }
    }

    /// Address the event to one recipient.
    #[must_use]
    pub fn for_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    /// Route the event to one serving node's dispatcher.
    #[must_use]
    pub fn routed_to(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach a kind-specific payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// The bus partition key: the recipient id for delivery/user events,
    /// the broadcast id otherwise. All events of one recipient share a
    /// partition, which is what makes per-recipient ordering hold.
    #[must_use]
    pub fn partition_key(&self) -> String {
        match self.event_type.aggregate_type() {
            AggregateType::Broadcast => self.broadcast_id.to_string(),
            AggregateType::Delivery | AggregateType::User => self
                .recipient_id
                .clone()
                .unwrap_or_else(|| self.broadcast_id.to_string()),
        }
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Deserialize from the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the bytes are not an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let envelope = EventEnvelope::new(
            EventKind::DeliveryDelivered,
            Uuid::new_v4(),
            Utc::now(),
            "corr-42",
        )
        .for_recipient("user-7")
        .with_payload(serde_json::json!({ "deliveredAt": "2026-01-01T00:00:00Z" }));

        let bytes = envelope.to_bytes().expect("encode");
        let decoded = EventEnvelope::from_bytes(&bytes).expect("decode");
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn wire_names_are_dotted() {
        let envelope = EventEnvelope::new(
            EventKind::BroadcastCreated,
            Uuid::new_v4(),
            Utc::now(),
            "corr-1",
        );
        let json: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().expect("encode")).expect("json");
        assert_eq!(json["eventType"], "BROADCAST.CREATED");
        assert!(json.get("recipientId").is_none());
        assert!(json.get("nodeId").is_none());
    }

    #[test]
    fn partition_key_follows_aggregate() {
        let broadcast_id = Uuid::new_v4();

        let created =
            EventEnvelope::new(EventKind::BroadcastCreated, broadcast_id, Utc::now(), "c");
        assert_eq!(created.partition_key(), broadcast_id.to_string());

        let delivered =
            EventEnvelope::new(EventKind::DeliveryDelivered, broadcast_id, Utc::now(), "c")
                .for_recipient("user-7");
        assert_eq!(delivered.partition_key(), "user-7");

        let read = EventEnvelope::new(EventKind::DeliveryRead, broadcast_id, Utc::now(), "c")
            .for_recipient("user-7");
        assert_eq!(read.partition_key(), "user-7");
    }

    #[test]
    fn aggregate_type_mapping() {
        assert_eq!(
            EventKind::BroadcastExpired.aggregate_type(),
            AggregateType::Broadcast
        );
        assert_eq!(
            EventKind::DeliveryPush.aggregate_type(),
            AggregateType::Delivery
        );
        assert_eq!(EventKind::DeliveryRead.aggregate_type(), AggregateType::User);
    }
}
