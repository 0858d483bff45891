//! The error taxonomy shared by every worker.
//!
//! Bus consumers route failures by class: retryables get bounded backoff and
//! then the dead-letter topic; fatals abort the worker so the supervisor
//! restarts it; everything else surfaces at the edge that caused it
//! (validation and not-found never enter a consumer).

use serde::{Deserialize, Serialize};

/// How a failure should be handled by the worker that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Transient bus/database/registry failure; retry with backoff, then DLT.
    Retryable,
    /// Bad input on an RPC; 400-class response, no side effects.
    Validation,
    /// Addressed resource absent; 404-class response.
    NotFound,
    /// The recipient directory is down; retry on the next scheduler tick.
    ExternalUnavailable,
    /// Data corruption or invariant violation; abort and restart.
    Fatal,
}

/// Classifies an error into the taxonomy.
///
/// Implemented by every crate-level error enum that can reach a worker loop.
pub trait Classify {
    /// The handling class for this error value.
    fn class(&self) -> ErrorClass;

    /// Convenience: whether a bounded retry is worthwhile.
    fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Retryable)
    }
}

impl Classify for crate::bus::BusError {
    fn class(&self) -> ErrorClass {
        // Everything the bus can throw is transient from the worker's view;
        // a permanently unreachable bus is caught at startup.
        ErrorClass::Retryable
    }
}

impl Classify for crate::registry::RegistryError {
    fn class(&self) -> ErrorClass {
        match self {
            crate::registry::RegistryError::Unavailable(_) => ErrorClass::Retryable,
            crate::registry::RegistryError::Corrupt(_) => ErrorClass::Fatal,
        }
    }
}

impl Classify for crate::directory::DirectoryError {
    fn class(&self) -> ErrorClass {
        match self {
            crate::directory::DirectoryError::Unavailable(_) => ErrorClass::ExternalUnavailable,
            crate::directory::DirectoryError::Rejected(_) => ErrorClass::Validation,
        }
    }
}

impl Classify for crate::fault::FaultError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Retryable
    }
}

impl Classify for crate::inbox::InboxCacheError {
    fn class(&self) -> ErrorClass {
        match self {
            // Cache failures degrade to database reads; retry is cheap.
            crate::inbox::InboxCacheError::Unavailable(_) => ErrorClass::Retryable,
            crate::inbox::InboxCacheError::Corrupt(_) => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryError;
    use crate::registry::RegistryError;

    #[test]
    fn directory_outage_is_external() {
        let err = DirectoryError::Unavailable("timeout".into());
        assert_eq!(err.class(), ErrorClass::ExternalUnavailable);
        assert!(!err.is_retryable());
    }

    #[test]
    fn registry_corruption_is_fatal() {
        let err = RegistryError::Corrupt("bad json".into());
        assert_eq!(err.class(), ErrorClass::Fatal);
        let err = RegistryError::Unavailable("down".into());
        assert!(err.is_retryable());
    }
}
