//! Recipient preference rows.

use crate::error::StoreError;
use herald_core::preferences::RecipientPreferences;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// Repository over the `recipient_preferences` table.
#[derive(Clone)]
pub struct PreferencesRepository {
    pool: PgPool,
}

impl PreferencesRepository {
    /// Create a repository over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A recipient's preferences; defaults when no row exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on query failure.
    pub async fn get(
        &self,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RecipientPreferences, StoreError> {
        let row = sqlx::query(
            r"
            SELECT recipient_id, muted_categories, updated_at
            FROM recipient_preferences
            WHERE recipient_id = $1
            ",
        )
        .bind(recipient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map_or_else(
            || RecipientPreferences::default_for(recipient_id, now),
            |row| RecipientPreferences {
                recipient_id: row.get("recipient_id"),
                muted_categories: row.get("muted_categories"),
                updated_at: row.get("updated_at"),
            },
        ))
    }

    /// Insert or replace a recipient's preferences.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure.
    pub async fn upsert(&self, prefs: &RecipientPreferences) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO recipient_preferences (recipient_id, muted_categories, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (recipient_id) DO UPDATE
            SET muted_categories = EXCLUDED.muted_categories, updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(&prefs.recipient_id)
        .bind(&prefs.muted_categories)
        .bind(prefs.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
