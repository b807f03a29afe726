//! Error types for the bridge server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::proxy::ProxyError;

/// Error type for request-local failures and client-input errors
pub const INVALID_REQUEST_ERROR: &str = "invalid_request_error";
/// Error type for upstream transport failures
pub const UPSTREAM_ERROR: &str = "upstream_error";
/// Error type for requests refused while shutting down
pub const UNAVAILABLE_ERROR: &str = "overloaded_error";

/// Error answered directly to the client as `{"error":{"message","type"}}`
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error_type: &'static str,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    error_type: &'a str,
}

impl ApiError {
    /// Create an error with an explicit status and type
    pub fn new(status: StatusCode, message: impl Into<String>, error_type: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            error_type,
        }
    }

    /// 400 for malformed client input
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, INVALID_REQUEST_ERROR)
    }

    /// 405 for an unsupported method
    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
            INVALID_REQUEST_ERROR,
        )
    }

    /// 413 for a request body over the configured limit
    pub fn payload_too_large() -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large",
            INVALID_REQUEST_ERROR,
        )
    }

    /// 503 for requests arriving after draining started
    pub fn shutting_down() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Server is shutting down",
            UNAVAILABLE_ERROR,
        )
    }

    /// HTTP status
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Error type string
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        self.error_type
    }

    /// Client-facing message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&ProxyError> for ApiError {
    fn from(error: &ProxyError) -> Self {
        Self::new(error.status(), error.client_message(), UPSTREAM_ERROR)
    }
}

impl From<ProxyError> for ApiError {
    fn from(error: ProxyError) -> Self {
        Self::from(&error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                message: &self.message,
                error_type: self.error_type,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Errors that stop the server itself
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address
        address: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serving connections failed
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] bridge_config::ConfigError),

    /// HTTP client could not be constructed
    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),

    /// Metrics could not be registered
    #[error(transparent)]
    Telemetry(#[from] bridge_telemetry::TelemetryError),
}
