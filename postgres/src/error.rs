//! Store error type shared by every repository in this crate.

use herald_core::error::{Classify, ErrorClass};
use thiserror::Error;

/// Errors raised by the `PostgreSQL` repositories.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The database rejected the operation or is unreachable; transient.
    #[error("Database error: {0}")]
    Database(String),

    /// The addressed row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation would violate a state invariant (e.g. regressing a
    /// terminal broadcast, redriving a delivered row).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Wrap a sqlx error, preserving the message.
    #[must_use]
    pub fn from_sqlx(e: &sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl Classify for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Database(_) => ErrorClass::Retryable,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Conflict(_) => ErrorClass::Validation,
            Self::Corrupt(_) => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StoreError::Database("timeout".into()).is_retryable());
        assert_eq!(
            StoreError::NotFound("x".into()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            StoreError::Conflict("x".into()).class(),
            ErrorClass::Validation
        );
        assert_eq!(StoreError::Corrupt("x".into()).class(), ErrorClass::Fatal);
    }
}
