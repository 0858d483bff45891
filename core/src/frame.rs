//! Wire frames sent over a push connection.
//!
//! Every server-push event is one JSON object `{type, timestamp, data}`.
//! Within one connection, frames preserve enqueue order; across a
//! recipient's connections there is no ordering guarantee.

use crate::inbox::InboxEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of frame types a client can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    /// First frame after connect; carries the connection id.
    Connected,
    /// A broadcast message for this recipient.
    Message,
    /// Another session of the same recipient acknowledged a message.
    ReadReceipt,
    /// A broadcast was cancelled or expired; drop it from display.
    MessageRemoved,
    /// Keep-alive.
    Heartbeat,
}

impl FrameKind {
    /// Stable wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::ReadReceipt => "READ_RECEIPT",
            Self::MessageRemoved => "MESSAGE_REMOVED",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

/// One server-push event: `{type, timestamp, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    /// Frame type.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// UTC emission time.
    pub timestamp: DateTime<Utc>,
    /// Type-specific payload.
    pub data: serde_json::Value,
}

impl PushFrame {
    /// The `CONNECTED` frame sent first on every new connection.
    #[must_use]
    pub fn connected(connection_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            kind: FrameKind::Connected,
            timestamp: now,
            data: serde_json::json!({ "connectionId": connection_id }),
        }
    }

    /// A `MESSAGE` frame carrying one inbox entry.
    ///
    /// Falls back to an empty object if the entry fails to serialize, which
    /// cannot happen for the field types involved.
    #[must_use]
    pub fn message(entry: &InboxEntry, now: DateTime<Utc>) -> Self {
        Self {
            kind: FrameKind::Message,
            timestamp: now,
            data: serde_json::to_value(entry).unwrap_or_else(|_| serde_json::json!({})),
        }
    }

    /// A `READ_RECEIPT` frame for cross-session read sync.
    #[must_use]
    pub fn read_receipt(broadcast_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            kind: FrameKind::ReadReceipt,
            timestamp: now,
            data: serde_json::json!({ "broadcastId": broadcast_id }),
        }
    }

    /// A `MESSAGE_REMOVED` frame for a terminal broadcast.
    #[must_use]
    pub fn message_removed(broadcast_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            kind: FrameKind::MessageRemoved,
            timestamp: now,
            data: serde_json::json!({ "broadcastId": broadcast_id }),
        }
    }

    /// A `HEARTBEAT` keep-alive frame.
    #[must_use]
    pub fn heartbeat(now: DateTime<Utc>) -> Self {
        Self {
            kind: FrameKind::Heartbeat,
            timestamp: now,
            data: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn frames_serialize_with_type_tag() {
        let frame = PushFrame::heartbeat(Utc::now());
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "HEARTBEAT");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn connected_frame_carries_connection_id() {
        let id = Uuid::new_v4();
        let frame = PushFrame::connected(id, Utc::now());
        assert_eq!(frame.data["connectionId"], serde_json::json!(id));
    }

    #[test]
    fn removal_frame_carries_broadcast_id() {
        let id = Uuid::new_v4();
        let frame = PushFrame::message_removed(id, Utc::now());
        assert_eq!(frame.kind, FrameKind::MessageRemoved);
        assert_eq!(frame.data["broadcastId"], serde_json::json!(id));
    }
}
