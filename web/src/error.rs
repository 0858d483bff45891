//! HTTP error envelope.
//!
//! Every error response carries the same JSON body:
//! `{timestamp, status, error, message, path}`. Handlers attach the request
//! path when they construct the error; the domain error's class picks the
//! status.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use herald_core::error::{Classify, ErrorClass};
use serde::Serialize;
use std::fmt;

/// An HTTP-ready error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    path: String,
}

impl ApiError {
    /// A 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            path: path.into(),
        }
    }

    /// A 404 Not Found.
    #[must_use]
    pub fn not_found(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            path: path.into(),
        }
    }

    /// A 409 Conflict.
    #[must_use]
    pub fn conflict(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
            path: path.into(),
        }
    }

    /// A 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
            path: path.into(),
        }
    }

    /// A 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            path: path.into(),
        }
    }

    /// Map a classified domain error onto a status:
    /// validation → 400, not-found → 404, external-unavailable → 503,
    /// everything retryable or fatal → 500.
    #[must_use]
    pub fn from_classified<E>(error: &E, path: impl Into<String>) -> Self
    where
        E: Classify + fmt::Display,
    {
        let status = match error.class() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::ExternalUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorClass::Retryable | ErrorClass::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
            path: path.into(),
        }
    }

    /// The response status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

/// The wire shape of an error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    timestamp: DateTime<Utc>,
    status: u16,
    error: String,
    message: String,
    path: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                path = %self.path,
                message = %self.message,
                "Request failed"
            );
        }
        let body = ErrorBody {
            timestamp: Utc::now(),
            status: self.status.as_u16(),
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: self.message,
            path: self.path,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use herald_postgres::StoreError;

    #[test]
    fn classified_mapping() {
        let err = ApiError::from_classified(&StoreError::NotFound("broadcast x".into()), "/api/x");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ApiError::from_classified(&StoreError::Conflict("terminal".into()), "/api/x");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from_classified(&StoreError::Database("down".into()), "/api/x");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn body_shape() {
        let err = ApiError::bad_request("content must not be empty", "/api/broadcasts");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
