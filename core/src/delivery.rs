//! Per-recipient delivery rows: the record of one broadcast's lifecycle for
//! one recipient.
//!
//! Rows are unique on `(broadcast_id, recipient_id)`. `DELIVERED` and `READ`
//! are sticky: they never regress except through the explicit redrive path,
//! which resets the delivery status to `PENDING` and clears `delivered_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by delivery-state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Unknown status string from storage.
    #[error("Unknown delivery state: {0}")]
    UnknownState(String),
}

/// Push outcome for one `(broadcast, recipient)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Created at fan-out; awaiting a live push or a reconnect pull.
    Pending,
    /// Reached the recipient. Sticky.
    Delivered,
    /// Dropped by backpressure or exhausted retries.
    Failed,
    /// Obsoleted before delivery (broadcast cancelled pre-activation).
    Superseded,
}

impl DeliveryStatus {
    /// Stable database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
            Self::Superseded => "SUPERSEDED",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::UnknownState`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, DeliveryError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "DELIVERED" => Ok(Self::Delivered),
            "FAILED" => Ok(Self::Failed),
            "SUPERSEDED" => Ok(Self::Superseded),
            other => Err(DeliveryError::UnknownState(other.to_string())),
        }
    }
}

/// Whether the recipient has acknowledged the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadStatus {
    /// Not yet acknowledged.
    Unread,
    /// Acknowledged. Sticky; implies `DELIVERED`.
    Read,
}

impl ReadStatus {
    /// Stable database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "UNREAD",
            Self::Read => "READ",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::UnknownState`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, DeliveryError> {
        match s {
            "UNREAD" => Ok(Self::Unread),
            "READ" => Ok(Self::Read),
            other => Err(DeliveryError::UnknownState(other.to_string())),
        }
    }
}

/// One broadcast's delivery record for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientDelivery {
    /// Row id; doubles as the message id surfaced to clients.
    pub id: Uuid,
    /// The broadcast this row tracks.
    pub broadcast_id: Uuid,
    /// The recipient this row tracks.
    pub recipient_id: String,
    /// Push outcome.
    pub delivery_status: DeliveryStatus,
    /// Acknowledgement state.
    pub read_status: ReadStatus,
    /// When the message reached the recipient.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the recipient acknowledged.
    pub read_at: Option<DateTime<Utc>>,
    /// Row creation (fan-out) time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl RecipientDelivery {
    /// A fresh `PENDING`/`UNREAD` row, as created at fan-out.
    #[must_use]
    pub fn pending(broadcast_id: Uuid, recipient_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            broadcast_id,
            recipient_id: recipient_id.into(),
            delivery_status: DeliveryStatus::Pending,
            read_status: ReadStatus::Unread,
            delivered_at: None,
            read_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a `DELIVERED` stamp would be a first transition.
    ///
    /// Consumers use this probe to stay idempotent: a replayed `DELIVERED`
    /// event for an already-delivered or already-read row is a no-op.
    #[must_use]
    pub const fn can_mark_delivered(&self) -> bool {
        matches!(self.delivery_status, DeliveryStatus::Pending | DeliveryStatus::Failed)
    }

    /// Whether a `READ` stamp would be a first transition.
    #[must_use]
    pub const fn can_mark_read(&self) -> bool {
        matches!(self.read_status, ReadStatus::Unread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::Superseded,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Ok(status));
        }
        assert!(DeliveryStatus::parse("SENT").is_err());

        assert_eq!(ReadStatus::parse("READ"), Ok(ReadStatus::Read));
        assert_eq!(ReadStatus::parse("UNREAD"), Ok(ReadStatus::Unread));
        assert!(ReadStatus::parse("SEEN").is_err());
    }

    #[test]
    fn delivered_is_sticky() {
        let mut row = RecipientDelivery::pending(Uuid::new_v4(), "u1", Utc::now());
        assert!(row.can_mark_delivered());

        row.delivery_status = DeliveryStatus::Delivered;
        row.delivered_at = Some(Utc::now());
        assert!(!row.can_mark_delivered());
    }

    #[test]
    fn failed_rows_may_still_deliver() {
        let mut row = RecipientDelivery::pending(Uuid::new_v4(), "u1", Utc::now());
        row.delivery_status = DeliveryStatus::Failed;
        // A later reconnect pull may still land the message.
        assert!(row.can_mark_delivered());
    }

    #[test]
    fn read_is_sticky() {
        let mut row = RecipientDelivery::pending(Uuid::new_v4(), "u1", Utc::now());
        assert!(row.can_mark_read());
        row.read_status = ReadStatus::Read;
        assert!(!row.can_mark_read());
    }
}
