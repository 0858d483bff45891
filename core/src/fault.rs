//! Cluster-visible failure-injection flags.
//!
//! Tests drive the dead-letter and redrive paths through two flags in the
//! shared distributed region: an "armed" flag consumed atomically by the
//! next broadcast creation, and the set of broadcast ids whose consumer-side
//! processing must fail. Nothing here is process-global; every node sees
//! the same flags.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by flag operations.
#[derive(Error, Debug, Clone)]
pub enum FaultError {
    /// The backing store is unreachable.
    #[error("Fault flags unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future alias for flag operations.
pub type FaultFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FaultError>> + Send + 'a>>;

/// Failure-injection flags in the shared distributed region.
pub trait FaultFlags: Send + Sync {
    /// Arm the next broadcast creation for consumer failure.
    fn arm(&self) -> FaultFuture<'_, ()>;

    /// Clear the armed flag and every failing-broadcast mark.
    fn disarm(&self) -> FaultFuture<'_, ()>;

    /// Atomically consume the armed flag: returns `true` exactly once per
    /// arm, no matter how many nodes race on it.
    fn consume_armed(&self) -> FaultFuture<'_, bool>;

    /// Whether the armed flag is currently set (non-consuming; for the
    /// query RPC).
    fn is_armed(&self) -> FaultFuture<'_, bool>;

    /// Mark a broadcast for consumer failure.
    fn mark_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, ()>;

    /// Whether a broadcast is marked for consumer failure.
    fn is_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, bool>;

    /// Unmark a broadcast (redrive clears the mark so replay succeeds).
    fn clear_failing(&self, broadcast_id: Uuid) -> FaultFuture<'_, ()>;

    /// Every broadcast currently marked for failure.
    fn failing(&self) -> FaultFuture<'_, Vec<Uuid>>;
}
