//! `PostgreSQL` persistence for Herald: the broadcast store, per-recipient
//! delivery rows, the transactional outbox, statistics, the session mirror,
//! dead letters, recipient preferences, and the single-winner scheduler
//! locks.
//!
//! Every repository is a thin struct over a [`sqlx::PgPool`] with
//! hand-written parameterized SQL, no ORM. Writes that must travel with an
//! outbox append take a `&mut PgConnection` so they compose inside
//! [`Outbox::publish_with_state`], the single transactional boundary between
//! admin state and delivery fan-out.
//!
//! Migrations live under `migrations/` and run at startup via
//! [`run_migrations`]; the binary exits non-zero when they fail.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcasts;
pub mod dead_letter;
pub mod deliveries;
pub mod error;
pub mod locks;
pub mod outbox;
pub mod preferences;
pub mod sessions;
pub mod statistics;

pub use broadcasts::BroadcastRepository;
pub use dead_letter::{DeadLetterRecord, DeadLetterStore};
pub use deliveries::{DeliveryRepository, InboxRow};
pub use error::StoreError;
pub use locks::{LockGuard, SchedulerLock};
pub use outbox::Outbox;
pub use preferences::PreferencesRepository;
pub use sessions::SessionMirror;
pub use statistics::StatisticsRepository;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Open a connection pool with Herald's defaults.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the database is unreachable.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))
}

/// Run the embedded migrations.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a migration fails; the caller treats
/// this as fatal at startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}
