//! Crate-wide error type and its mapping onto HTTP responses.
//!
//! Every fallible operation in the gateway returns [`Result<T>`]. Adapter code
//! converts an [`Error`] into a client response via [`IntoResponse`]; the status
//! code and body shape follow the error-handling design in the project spec's
//! error taxonomy. Server-internal detail (a SQL message, a signature mismatch
//! reason) is logged at the point of conversion and never placed in the body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error enum. Variants map 1:1 onto the kinds in the error
/// taxonomy, plus a handful of ambient variants needed for `?`-based
/// propagation from configuration loading and persistence.
#[derive(Debug, Error)]
pub enum Error {
    /// Security filter rejected the request (IP block, size limit, attack pattern).
    #[error("security check failed")]
    Security(SecurityReason),

    /// Credential/token invalid, expired, or revoked.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Identity lacks the permission required for the action.
    #[error("authorization denied: {0}")]
    Authorization(String),

    /// Client's token bucket is empty.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Payload failed schema validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No topic mapping matches the requested route.
    #[error("no route for topic: {0}")]
    NoRoute(String),

    /// Envelope exceeds the configured size limit.
    #[error("message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),

    /// No response arrived before the router's deadline.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Publish to the bus failed.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Bus client could not reach (or lost) the broker.
    #[error("bus connect failed: {0}")]
    ConnectFailed(String),

    /// Subscription pattern is ambiguous (mixes `*`/`**` illegally) or otherwise invalid.
    #[error("invalid subscription pattern: {0}")]
    InvalidPattern(String),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Persistence layer (sessions/logs tables) failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JWT encode/decode failure, wrapped so it can flow through `?`.
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Low-level I/O failure (sockets, local IPC, files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else. Always logged with full context before conversion.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Reason a [`Error::Security`] was raised. Never serialized to the client;
/// used only for server-side logging, per the "never reveal which rule fired"
/// requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityReason {
    IpBlocked,
    IpNotAllowed,
    RequestTooLarge,
    SuspiciousPattern,
    InvalidClientAddress,
}

impl std::fmt::Display for SecurityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IpBlocked => "ip_blocked",
            Self::IpNotAllowed => "ip_not_allowed",
            Self::RequestTooLarge => "request_too_large",
            Self::SuspiciousPattern => "suspicious_pattern",
            Self::InvalidClientAddress => "invalid_client_address",
        };
        write!(f, "{s}")
    }
}

/// Client-facing error body. Always `{"detail": "..."}` per the spec's wire format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl Error {
    /// Whether this variant is ever allowed to fail open (caller proceeds anyway).
    /// Only the rate limiter's own internal-error path consults this; `RateLimitExceeded`
    /// itself is a hard reject, not a fail-open condition.
    pub fn is_rate_limit_internal_error(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Internal(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, detail): (StatusCode, String) = match &self {
            Error::Security(reason) => {
                tracing::warn!(reason = %reason, "security filter rejected request");
                let status = match reason {
                    SecurityReason::IpBlocked | SecurityReason::IpNotAllowed => {
                        StatusCode::FORBIDDEN
                    }
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, "request rejected".to_string())
            }
            Error::Authentication(msg) => {
                tracing::warn!(%msg, "authentication failed");
                (StatusCode::UNAUTHORIZED, msg.clone())
            }
            Error::Authorization(msg) => {
                tracing::warn!(%msg, "authorization denied");
                (StatusCode::FORBIDDEN, msg.clone())
            }
            Error::RateLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate limit exceeded".to_string(),
            ),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::NoRoute(topic) => (StatusCode::NOT_FOUND, format!("no route for {topic}")),
            Error::MessageTooLarge(size, max) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("message too large: {size} bytes (max {max})"),
            ),
            Error::Timeout(d) => {
                (StatusCode::GATEWAY_TIMEOUT, format!("timed out after {d:?}"))
            }
            Error::PublishFailed(msg) => {
                tracing::error!(%msg, "bus publish failed");
                (StatusCode::BAD_GATEWAY, "upstream publish failed".to_string())
            }
            Error::ConnectFailed(msg) => {
                tracing::error!(%msg, "bus connect failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "message bus unavailable".to_string(),
                )
            }
            Error::InvalidPattern(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::Config(e) => {
                tracing::error!(error = %e, "configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            Error::Database(e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            Error::Jwt(e) => {
                tracing::debug!(error = %e, "token decode failed");
                (StatusCode::UNAUTHORIZED, "invalid token".to_string())
            }
            Error::Io(e) => {
                tracing::error!(error = %e, "I/O error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            Error::Serialization(e) => {
                tracing::debug!(error = %e, "serialization error");
                (StatusCode::BAD_REQUEST, "malformed payload".to_string())
            }
            Error::Internal(msg) => {
                tracing::error!(%msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_reason_never_serialized_in_body() {
        let err = Error::Security(SecurityReason::SuspiciousPattern);
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rate_limit_maps_to_429() {
        let resp = Error::RateLimitExceeded.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn no_route_maps_to_404() {
        let resp = Error::NoRoute("api/unknown".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn message_too_large_maps_to_413() {
        let resp = Error::MessageTooLarge(20, 10).into_response();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn timeout_maps_to_504() {
        let resp = Error::Timeout(std::time::Duration::from_secs(30)).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn connect_failed_maps_to_503() {
        let resp = Error::ConnectFailed("refused".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn publish_failed_maps_to_502() {
        let resp = Error::PublishFailed("no subscribers".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
