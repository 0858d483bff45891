//! The distributed session registry: recipient → {node, connection}.
//!
//! The registry is eventually consistent and is never a source of truth for
//! delivery: losing a row only means a message queues in the recipient's
//! durable inbox instead of pushing live. The production implementation
//! (`herald-redis`) keeps TTLs on the primary records and a sorted index
//! keyed by heartbeat epoch so stale enumeration is `O(log n + k)`.

use crate::session::SessionRecord;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by registry operations.
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// The backing store is unreachable or failed mid-operation.
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("Corrupt registry record: {0}")]
    Corrupt(String),
}

/// Boxed future alias for registry operations (keeps the trait dyn-compatible).
pub type RegistryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RegistryError>> + Send + 'a>>;

/// Distributed mapping from recipient to live sessions.
pub trait SessionRegistry: Send + Sync {
    /// Insert a session and index it by heartbeat timestamp and node.
    /// Upserts: re-registering a connection id replaces its record.
    fn register(&self, session: &SessionRecord) -> RegistryFuture<'_, ()>;

    /// Refresh last-activity for every listed connection on `node_id`.
    fn heartbeat(&self, node_id: &str, connection_ids: &[Uuid]) -> RegistryFuture<'_, ()>;

    /// All live sessions for a recipient, across nodes.
    fn lookup(&self, recipient_id: &str) -> RegistryFuture<'_, Vec<SessionRecord>>;

    /// Connection ids whose last activity predates `threshold_epoch_milli`.
    fn stale_before(&self, threshold_epoch_milli: i64) -> RegistryFuture<'_, Vec<Uuid>>;

    /// Delete sessions and their index entries.
    fn remove(&self, connection_ids: &[Uuid]) -> RegistryFuture<'_, ()>;

    /// Live session count on one node.
    fn count_by_node(&self, node_id: &str) -> RegistryFuture<'_, u64>;

    /// Live session count across the cluster.
    fn count_total(&self) -> RegistryFuture<'_, u64>;
}
