//! Per-broadcast delivery statistics.
//!
//! Counters are monotonic and advance only on first transitions, so
//! `total_delivered <= total_targeted` and `total_read <= total_delivered`
//! hold at every observed point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregated delivery counters for one broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatistics {
    /// The broadcast these counters describe.
    pub broadcast_id: Uuid,
    /// Delivery rows materialized at fan-out.
    pub total_targeted: i64,
    /// First `DELIVERED` transitions.
    pub total_delivered: i64,
    /// First `READ` transitions.
    pub total_read: i64,
    /// First `FAILED` transitions.
    pub total_failed: i64,
    /// Running mean of (delivered_at − created_at), milliseconds.
    pub avg_delivery_time_ms: f64,
    /// Last counter update.
    pub calculated_at: DateTime<Utc>,
}

impl BroadcastStatistics {
    /// Zeroed counters for a new broadcast.
    #[must_use]
    pub const fn zero(broadcast_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            broadcast_id,
            total_targeted: 0,
            total_delivered: 0,
            total_read: 0,
            total_failed: 0,
            avg_delivery_time_ms: 0.0,
            calculated_at: now,
        }
    }

    /// `total_delivered / total_targeted`, zero when nothing was targeted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delivery_rate(&self) -> f64 {
        if self.total_targeted == 0 {
            0.0
        } else {
            self.total_delivered as f64 / self.total_targeted as f64
        }
    }

    /// `total_read / total_delivered`, zero when nothing was delivered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn read_rate(&self) -> f64 {
        if self.total_delivered == 0 {
            0.0
        } else {
            self.total_read as f64 / self.total_delivered as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_guard_zero_denominators() {
        let stats = BroadcastStatistics::zero(Uuid::new_v4(), Utc::now());
        assert!((stats.delivery_rate() - 0.0).abs() < f64::EPSILON);
        assert!((stats.read_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rates_divide_counters() {
        let mut stats = BroadcastStatistics::zero(Uuid::new_v4(), Utc::now());
        stats.total_targeted = 4;
        stats.total_delivered = 2;
        stats.total_read = 1;
        assert!((stats.delivery_rate() - 0.5).abs() < f64::EPSILON);
        assert!((stats.read_rate() - 0.5).abs() < f64::EPSILON);
    }
}
