//! Live push-session records.
//!
//! One record per open connection. A recipient may hold sessions on several
//! nodes at once; a connection id appears in the registry at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One live connection between a recipient and a serving node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The connected recipient.
    pub recipient_id: String,
    /// Unique per connection.
    pub connection_id: Uuid,
    /// The node owning the connection.
    pub node_id: String,
    /// The cluster the node belongs to.
    pub cluster_id: String,
    /// Connection establishment, epoch millis.
    pub connected_at_epoch_milli: i64,
    /// Last heartbeat or frame, epoch millis. Drives stale eviction.
    pub last_activity_at_epoch_milli: i64,
}

impl SessionRecord {
    /// A fresh record for a connection opened now.
    #[must_use]
    pub fn open(
        recipient_id: impl Into<String>,
        connection_id: Uuid,
        node_id: impl Into<String>,
        cluster_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let millis = now.timestamp_millis();
        Self {
            recipient_id: recipient_id.into(),
            connection_id,
            node_id: node_id.into(),
            cluster_id: cluster_id.into(),
            connected_at_epoch_milli: millis,
            last_activity_at_epoch_milli: millis,
        }
    }

    /// Whether the session's last activity predates `threshold`.
    #[must_use]
    pub const fn is_stale(&self, threshold_epoch_milli: i64) -> bool {
        self.last_activity_at_epoch_milli < threshold_epoch_milli
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_compares_last_activity() {
        let now = Utc::now();
        let session = SessionRecord::open("u1", Uuid::new_v4(), "node-a", "cluster-1", now);
        assert!(!session.is_stale(now.timestamp_millis() - 1));
        assert!(session.is_stale(now.timestamp_millis() + 1));
    }
}
