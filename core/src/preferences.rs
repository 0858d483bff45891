//! Recipient notification preferences.
//!
//! One row per recipient. A muted category suppresses the live push frame
//! only; the delivery row and inbox entry are still created, so catch-up on
//! reconnect is unaffected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recipient's delivery preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientPreferences {
    /// The recipient these preferences belong to.
    pub recipient_id: String,
    /// Categories whose live pushes are suppressed.
    pub muted_categories: Vec<String>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

impl RecipientPreferences {
    /// Defaults: nothing muted.
    #[must_use]
    pub fn default_for(recipient_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            muted_categories: Vec::new(),
            updated_at: now,
        }
    }

    /// Whether live pushes for `category` are suppressed.
    #[must_use]
    pub fn is_muted(&self, category: Option<&str>) -> bool {
        category.is_some_and(|c| self.muted_categories.iter().any(|m| m == c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muting_matches_category() {
        let mut prefs = RecipientPreferences::default_for("u1", Utc::now());
        assert!(!prefs.is_muted(Some("ops")));
        assert!(!prefs.is_muted(None));

        prefs.muted_categories.push("ops".into());
        assert!(prefs.is_muted(Some("ops")));
        assert!(!prefs.is_muted(Some("billing")));
        assert!(!prefs.is_muted(None));
    }
}
