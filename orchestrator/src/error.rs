//! Orchestrator error type: one enum over every collaborator, classified
//! into the worker taxonomy so the consumer loop can route failures.

use herald_core::bus::BusError;
use herald_core::directory::DirectoryError;
use herald_core::envelope::EnvelopeError;
use herald_core::error::{Classify, ErrorClass};
use herald_core::fault::FaultError;
use herald_core::inbox::InboxCacheError;
use herald_core::registry::RegistryError;
use herald_postgres::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised inside the relay, consumer, scheduler, and redrive paths.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Database failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Directory failure.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Inbox-cache failure.
    #[error(transparent)]
    Cache(#[from] InboxCacheError),

    /// Failure-injection flag store failure.
    #[error(transparent)]
    Fault(#[from] FaultError),

    /// A bus payload is not a valid envelope (poison message).
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// An envelope that must name a recipient did not.
    #[error("Event {event_id} is missing its recipient id")]
    MissingRecipient {
        /// The offending event.
        event_id: Uuid,
    },

    /// Failure injected by the test harness for this broadcast.
    #[error("Injected consumer failure for broadcast {broadcast_id}")]
    Injected {
        /// The marked broadcast.
        broadcast_id: Uuid,
    },
}

impl Classify for OrchestratorError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Store(e) => e.class(),
            Self::Bus(e) => e.class(),
            Self::Registry(e) => e.class(),
            Self::Directory(e) => e.class(),
            Self::Cache(e) => e.class(),
            Self::Fault(_) => ErrorClass::Retryable,
            // Poison messages retry zero times and go straight to the DLT.
            Self::Envelope(_) | Self::MissingRecipient { .. } => ErrorClass::Validation,
            // Injected failures take the full retry path so tests exercise it.
            Self::Injected { .. } => ErrorClass::Retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poison_is_not_retried() {
        let err = OrchestratorError::MissingRecipient {
            event_id: Uuid::new_v4(),
        };
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[test]
    fn injected_failures_take_the_retry_path() {
        let err = OrchestratorError::Injected {
            broadcast_id: Uuid::new_v4(),
        };
        assert!(err.is_retryable());
    }
}
