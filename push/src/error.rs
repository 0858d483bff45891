//! Push-layer errors.

use herald_core::error::{Classify, ErrorClass};
use thiserror::Error;

/// Errors raised by the push-session layer.
#[derive(Error, Debug, Clone)]
pub enum PushError {
    /// The node is draining and refuses new connections.
    #[error("Node is draining, refusing new connections")]
    Draining,

    /// The connection's queue stayed full past the flush timeout.
    #[error("Connection queue saturated")]
    QueueFull,

    /// The connection exceeded the overflow budget and was force-closed.
    #[error("Slow consumer, connection force-closed")]
    SlowConsumer,

    /// The connection is gone (client went away).
    #[error("Connection closed")]
    Closed,

    /// A collaborating store failed.
    #[error("Push store error: {0}")]
    Store(String),
}

impl Classify for PushError {
    fn class(&self) -> ErrorClass {
        match self {
            // Clients should retry the connect against another node.
            Self::Draining => ErrorClass::ExternalUnavailable,
            // Dropped frames degrade to pull-on-reconnect; nothing to retry.
            Self::QueueFull | Self::SlowConsumer | Self::Closed => ErrorClass::Validation,
            Self::Store(_) => ErrorClass::Retryable,
        }
    }
}
