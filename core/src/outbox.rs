//! The transactional outbox row.
//!
//! Outbox rows are appended in the same database transaction as the state
//! change they describe, then drained by the relay in `created_at` order
//! (ties broken by id) and published to the bus with the aggregate id as the
//! partition key. Rows are deleted after successful publish, so the table is
//! eventually empty when admin traffic stops.

use crate::envelope::{AggregateType, EnvelopeError, EventEnvelope, EventKind};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One durable event awaiting publication.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    /// Row id, assigned at insert. Publication order is controlled purely by
    /// `created_at` (id is only a tiebreaker), so ids are plain UUIDs.
    pub id: Uuid,
    /// Aggregate the event belongs to.
    pub aggregate_type: AggregateType,
    /// Partition key on the bus: recipient id for delivery/user events,
    /// broadcast id for broadcast events.
    pub aggregate_id: String,
    /// Event kind, denormalized for observability.
    pub event_type: EventKind,
    /// Bus topic to publish to.
    pub topic: String,
    /// The serialized [`EventEnvelope`], forwarded to the bus verbatim.
    pub payload: Vec<u8>,
    /// Insert time; the global drain order.
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Wrap an envelope for the given topic.
    ///
    /// The aggregate type and partition key are derived from the envelope so
    /// the relay never has to inspect payloads.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if the envelope cannot be serialized.
    pub fn from_envelope(topic: impl Into<String>, envelope: &EventEnvelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_type: envelope.event_type.aggregate_type(),
            aggregate_id: envelope.partition_key(),
            event_type: envelope.event_type,
            topic: topic.into(),
            payload: envelope.to_bytes()?,
            created_at: envelope.timestamp,
        })
    }

    /// Decode the wrapped envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the payload is not an envelope.
    pub fn envelope(&self) -> Result<EventEnvelope, EnvelopeError> {
        EventEnvelope::from_bytes(&self.payload)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn outbox_event_derives_key_from_envelope() {
        let broadcast_id = Uuid::new_v4();
        let envelope =
            EventEnvelope::new(EventKind::DeliveryDelivered, broadcast_id, Utc::now(), "c")
                .for_recipient("user-3");

        let row = OutboxEvent::from_envelope("herald.orchestration", &envelope).expect("wrap");
        assert_eq!(row.aggregate_type, AggregateType::Delivery);
        assert_eq!(row.aggregate_id, "user-3");
        assert_eq!(row.topic, "herald.orchestration");
        assert_eq!(row.envelope().expect("unwrap"), envelope);
    }

    #[test]
    fn broadcast_events_key_on_broadcast_id() {
        let broadcast_id = Uuid::new_v4();
        let envelope =
            EventEnvelope::new(EventKind::BroadcastCancelled, broadcast_id, Utc::now(), "c");
        let row = OutboxEvent::from_envelope("herald.orchestration", &envelope).expect("wrap");
        assert_eq!(row.aggregate_id, broadcast_id.to_string());
    }
}
