//! The broadcast aggregate: an administrator-authored message targeting a
//! set of recipients.
//!
//! A broadcast is immutable after creation except for its status and
//! `updated_at`. Status advances monotonically
//! (`SCHEDULED → ACTIVE → EXPIRED | CANCELLED`); `CANCELLED` and `EXPIRED`
//! are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when constructing or transitioning a broadcast.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// The requested status transition would regress or leave a terminal state.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: BroadcastStatus,
        /// Requested status.
        to: BroadcastStatus,
    },

    /// A field failed validation at creation time.
    #[error("Invalid broadcast: {0}")]
    Validation(String),
}

/// Who a broadcast is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// Every registered recipient.
    All,
    /// The explicit recipient ids in `target_ids`.
    Selected,
    /// Every recipient holding one of the roles in `target_ids`.
    Role,
}

impl TargetType {
    /// Stable database/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::Selected => "SELECTED",
            Self::Role => "ROLE",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Validation`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, BroadcastError> {
        match s {
            "ALL" => Ok(Self::All),
            "SELECTED" => Ok(Self::Selected),
            "ROLE" => Ok(Self::Role),
            other => Err(BroadcastError::Validation(format!(
                "unknown target type: {other}"
            ))),
        }
    }
}

/// Delivery urgency attached to a broadcast. Informational for clients;
/// the pipeline treats all priorities alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Background announcements.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Time-sensitive.
    High,
    /// Drop-everything.
    Urgent,
}

impl Priority {
    /// Stable database/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Validation`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, BroadcastError> {
        match s {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            other => Err(BroadcastError::Validation(format!(
                "unknown priority: {other}"
            ))),
        }
    }
}

/// Lifecycle state of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastStatus {
    /// Created with a future `scheduled_at`; not yet fanned out.
    Scheduled,
    /// Fanned out; live until expiry or cancellation.
    Active,
    /// Past `expires_at`, or fire-and-forget after its first delivery. Terminal.
    Expired,
    /// Withdrawn by an administrator. Terminal.
    Cancelled,
}

impl BroadcastStatus {
    /// Stable database/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Validation`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, BroadcastError> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "ACTIVE" => Ok(Self::Active),
            "EXPIRED" => Ok(Self::Expired),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(BroadcastError::Validation(format!(
                "unknown broadcast status: {other}"
            ))),
        }
    }

    /// Whether the status machine permits advancing to `next`.
    ///
    /// Statuses only move forward: `SCHEDULED → ACTIVE → EXPIRED|CANCELLED`,
    /// and `SCHEDULED → CANCELLED` (cancel before activation). Terminal
    /// states admit nothing.
    #[must_use]
    pub const fn can_advance_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Active | Self::Cancelled | Self::Expired)
                | (Self::Active, Self::Expired | Self::Cancelled)
        )
    }

    /// Terminal states admit no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }
}

/// An administrator-authored message targeting a set of recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    /// Unique identifier.
    pub id: Uuid,
    /// Stable id of the authoring administrator.
    pub sender_id: String,
    /// Display name of the authoring administrator.
    pub sender_name: String,
    /// Message body.
    pub content: String,
    /// Targeting mode.
    pub target_type: TargetType,
    /// Recipient or role ids; empty iff `target_type` is `ALL`.
    pub target_ids: Vec<String>,
    /// Delivery urgency.
    pub priority: Priority,
    /// Free-form category label.
    pub category: Option<String>,
    /// When the broadcast should activate; `None` means immediately.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the broadcast expires; `None` means never.
    pub expires_at: Option<DateTime<Utc>>,
    /// Expire after the first successful delivery.
    pub fire_and_forget: bool,
    /// Correlates every event of this broadcast across retries.
    pub correlation_id: String,
    /// Lifecycle state.
    pub status: BroadcastStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Broadcast {
    /// Validate the cross-field invariants a broadcast must satisfy at
    /// creation: `scheduled_at <= expires_at` when both are set, non-empty
    /// content, and target ids consistent with the target type.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Validation`] naming the violated rule.
    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.content.trim().is_empty() {
            return Err(BroadcastError::Validation("content must not be empty".into()));
        }
        match self.target_type {
            TargetType::All if !self.target_ids.is_empty() => {
                return Err(BroadcastError::Validation(
                    "target ids must be empty when targeting ALL".into(),
                ));
            }
            TargetType::Selected | TargetType::Role if self.target_ids.is_empty() => {
                return Err(BroadcastError::Validation(
                    "target ids must not be empty for SELECTED/ROLE targeting".into(),
                ));
            }
            _ => {}
        }
        if let (Some(scheduled), Some(expires)) = (self.scheduled_at, self.expires_at) {
            if scheduled > expires {
                return Err(BroadcastError::Validation(
                    "scheduled_at must not be after expires_at".into(),
                ));
            }
        }
        Ok(())
    }

    /// Whether the broadcast should fan out immediately on creation.
    ///
    /// True when there is no schedule, or the schedule is already due.
    #[must_use]
    pub fn is_immediate(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Whether `now` falls inside the broadcast's delivery window.
    #[must_use]
    pub fn within_window(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    /// Advance the status machine, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::InvalidTransition`] when the move would
    /// regress or leave a terminal state.
    pub fn advance(&mut self, next: BroadcastStatus, now: DateTime<Utc>) -> Result<(), BroadcastError> {
        if !self.status.can_advance_to(next) {
            return Err(BroadcastError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

impl std::fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn broadcast(target_type: TargetType, target_ids: Vec<String>) -> Broadcast {
        let now = Utc::now();
        Broadcast {
            id: Uuid::new_v4(),
            sender_id: "admin-1".into(),
            sender_name: "Admin".into(),
            content: "maintenance at noon".into(),
            target_type,
            target_ids,
            priority: Priority::Normal,
            category: None,
            scheduled_at: None,
            expires_at: None,
            fire_and_forget: false,
            correlation_id: "corr-1".into(),
            status: BroadcastStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_advances_forward_only() {
        use BroadcastStatus::{Active, Cancelled, Expired, Scheduled};

        assert!(Scheduled.can_advance_to(Active));
        assert!(Scheduled.can_advance_to(Cancelled));
        assert!(Active.can_advance_to(Expired));
        assert!(Active.can_advance_to(Cancelled));

        assert!(!Active.can_advance_to(Scheduled));
        assert!(!Expired.can_advance_to(Active));
        assert!(!Cancelled.can_advance_to(Active));
        assert!(!Cancelled.can_advance_to(Expired));
    }

    #[test]
    fn terminal_states() {
        assert!(BroadcastStatus::Expired.is_terminal());
        assert!(BroadcastStatus::Cancelled.is_terminal());
        assert!(!BroadcastStatus::Scheduled.is_terminal());
        assert!(!BroadcastStatus::Active.is_terminal());
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            BroadcastStatus::Scheduled,
            BroadcastStatus::Active,
            BroadcastStatus::Expired,
            BroadcastStatus::Cancelled,
        ] {
            assert_eq!(BroadcastStatus::parse(status.as_str()), Ok(status));
        }
        assert!(BroadcastStatus::parse("DRAFT").is_err());
    }

    #[test]
    fn validate_rejects_target_mismatch() {
        let b = broadcast(TargetType::All, vec!["u1".into()]);
        assert!(b.validate().is_err());

        let b = broadcast(TargetType::Selected, vec![]);
        assert!(b.validate().is_err());

        let b = broadcast(TargetType::Selected, vec!["u1".into()]);
        assert!(b.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_window() {
        let mut b = broadcast(TargetType::All, vec![]);
        b.scheduled_at = Some(Utc::now() + chrono::Duration::hours(2));
        b.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(b.validate().is_err());
    }

    #[test]
    fn advance_rejects_regression() {
        let mut b = broadcast(TargetType::All, vec![]);
        let before = b.updated_at;
        b.advance(BroadcastStatus::Expired, Utc::now() + chrono::Duration::seconds(1))
            .expect("active -> expired is legal");
        assert!(b.updated_at > before);

        let err = b.advance(BroadcastStatus::Active, Utc::now());
        assert!(matches!(err, Err(BroadcastError::InvalidTransition { .. })));
    }

    #[test]
    fn immediate_when_unscheduled_or_due() {
        let now = Utc::now();
        let mut b = broadcast(TargetType::All, vec![]);
        assert!(b.is_immediate(now));

        b.scheduled_at = Some(now - chrono::Duration::seconds(5));
        assert!(b.is_immediate(now));

        b.scheduled_at = Some(now + chrono::Duration::minutes(5));
        assert!(!b.is_immediate(now));
    }
}
