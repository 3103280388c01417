//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Most variants
//! never leave the process: they are caught where they occur and logged with
//! their context. Only the administrative HTTP surface turns them into a
//! structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: batch_size must be positive",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category              | HTTP Status               |
/// |-----------|-----------------------|---------------------------|
/// | 1000–1999 | Client / protocol     | 400 Bad Request           |
/// | 2000–2999 | Access                | 401 / 403                 |
/// | 3000–3999 | Server / collaborator | 500 / 502                 |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A client sent a line that is not a valid command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An upstream bus payload could not be interpreted.
    #[error("invalid bus message on #{channel}: {reason}")]
    BusMessage {
        /// Channel the payload arrived on.
        channel: String,
        /// Why the payload was rejected.
        reason: String,
    },

    /// An operation referenced state that must exist but does not.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// A connection was refused during identification.
    #[error("identification declined: {0}")]
    IdentityDecline(String),

    /// The client transport failed or was already closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong administrative credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Error reported by the Redis backend.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Protocol(_) => 1002,
            Self::BusMessage { .. } => 1003,
            Self::Unauthorized => 2001,
            Self::IdentityDecline(_) => 2002,
            Self::Internal(_) => 3000,
            Self::Consistency(_) => 3001,
            Self::Transport(_) => 3002,
            Self::Redis(_) => 3003,
            Self::Serialization(_) => 3004,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Protocol(_) | Self::BusMessage { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::IdentityDecline(_) => StatusCode::FORBIDDEN,
            Self::Redis(_) | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Consistency(_) | Self::Serialization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
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
