//! Fixture builders shared across test suites.

use chrono::{Duration, Utc};
use herald_core::broadcast::{Broadcast, BroadcastStatus, Priority, TargetType};
use uuid::Uuid;

/// An `ACTIVE` broadcast targeting the given recipients, expiring in an
/// hour, with a deterministic correlation id.
#[must_use]
pub fn active_broadcast<I, S>(recipients: I) -> Broadcast
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let now = Utc::now();
    let target_ids: Vec<String> = recipients.into_iter().map(Into::into).collect();
    let id = Uuid::new_v4();
    Broadcast {
        id,
        sender_id: "admin-1".into(),
        sender_name: "Admin".into(),
        content: "all hands at noon".into(),
        target_type: if target_ids.is_empty() {
            TargetType::All
        } else {
            TargetType::Selected
        },
        target_ids,
        priority: Priority::Normal,
        category: None,
        scheduled_at: None,
        expires_at: Some(now + Duration::hours(1)),
        fire_and_forget: false,
        correlation_id: format!("corr-{id}"),
        status: BroadcastStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

/// A `SCHEDULED` broadcast activating at `in_seconds` from now.
#[must_use]
pub fn scheduled_broadcast<I, S>(recipients: I, in_seconds: i64) -> Broadcast
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut broadcast = active_broadcast(recipients);
    broadcast.status = BroadcastStatus::Scheduled;
    broadcast.scheduled_at = Some(Utc::now() + Duration::seconds(in_seconds));
    broadcast
}
