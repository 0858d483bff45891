//! The external recipient directory.
//!
//! Target expansion (ALL / ROLE / SELECTED → concrete recipient ids) is an
//! external capability: Herald only defines the seam. Directory outages are
//! a distinct error kind so the scheduler retries targeting on its next tick
//! instead of failing the broadcast.

use crate::broadcast::TargetType;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised by directory lookups.
#[derive(Error, Debug, Clone)]
pub enum DirectoryError {
    /// The directory service is down or timing out. Retry on the next tick.
    #[error("Recipient directory unavailable: {0}")]
    Unavailable(String),

    /// The directory rejected the query (unknown role, malformed id).
    #[error("Directory rejected query: {0}")]
    Rejected(String),
}

/// Boxed future alias for directory operations.
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DirectoryError>> + Send + 'a>>;

/// Resolves a targeting expression to concrete recipient ids.
pub trait RecipientDirectory: Send + Sync {
    /// Expand `(target_type, target_ids)` into the concrete recipient-id set.
    ///
    /// For `SELECTED` the directory validates and echoes the ids; for `ROLE`
    /// it resolves role membership; for `ALL` it enumerates the population.
    fn resolve(&self, target_type: TargetType, target_ids: &[String]) -> DirectoryFuture<'_, Vec<String>>;
}
