//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for everything above the
//! connection boundary: dependency mounting, session routing, server
//! startup. Each variant maps to an HTTP status code and a structured JSON
//! error response. Transport-level failures live in
//! [`crate::connection::ConnectionError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::connection::ConnectionError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1002,
///     "message": "unknown package: widgets",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status               |
/// |-----------|-------------------|---------------------------|
/// | 1000–1999 | Bad descriptors   | 500 Internal Server Error |
/// | 2000–2999 | Not Found         | 404 Not Found             |
/// | 3000–3999 | Server            | 500 Internal Server Error |
/// | 4000–4999 | Session protocol  | 400 Bad Request           |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A dependency descriptor is missing the fields needed to mount it.
    #[error("invalid dependency {name}: {reason}")]
    InvalidDependency {
        /// `name-version` of the offending dependency.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A dependency names an owning package that was never registered.
    #[error("unknown package: {0}")]
    UnknownPackage(String),

    /// No live session with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A session's message protocol was violated.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport failure surfaced above the connection boundary.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// I/O failure while binding or serving.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidDependency { .. } => 1001,
            Self::UnknownPackage(_) => 1002,
            Self::Protocol(_) => 4001,
            Self::SessionNotFound(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Connection(_) => 3001,
            Self::Io(_) => 3002,
            Self::Config(_) => 3003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::InvalidDependency { .. }
            | Self::UnknownPackage(_)
            | Self::Connection(_)
            | Self::Io(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn unknown_package_is_server_error() {
        let err = GatewayError::UnknownPackage("widgets".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), 1002);
        assert_eq!(err.to_string(), "unknown package: widgets");
    }

    #[test]
    fn session_not_found_maps_to_404() {
        let response = GatewayError::SessionNotFound("abc".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn codes_follow_documented_ranges() {
        let cases = [
            GatewayError::InvalidDependency {
                name: "a-1".to_string(),
                reason: "missing".to_string(),
            },
            GatewayError::UnknownPackage("p".to_string()),
            GatewayError::SessionNotFound("s".to_string()),
            GatewayError::Protocol("no method".to_string()),
            GatewayError::Connection(ConnectionError::Closed),
            GatewayError::Config("bad".to_string()),
            GatewayError::Internal("oops".to_string()),
        ];
        for err in cases {
            let expected = match err.error_code() {
                1000..=1999 | 3000..=3999 => StatusCode::INTERNAL_SERVER_ERROR,
                2000..=2999 => StatusCode::NOT_FOUND,
                4000..=4999 => StatusCode::BAD_REQUEST,
                code => panic!("code {code} outside every range"),
            };
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[test]
    fn connection_error_converts() {
        let err: GatewayError = ConnectionError::Closed.into();
        assert_eq!(err.error_code(), 3001);
        assert!(matches!(err, GatewayError::Connection(ConnectionError::Closed)));
    }
}
