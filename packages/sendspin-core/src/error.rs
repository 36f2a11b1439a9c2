//! Centralized error types for the Sendspin protocol implementation.
//!
//! Most of the taxonomy in §7 never reaches a caller as a `Result::Err`:
//! `ProtocolViolation` closes the socket, `DecodeError`/`CapabilityMismatch`
//! are silently absorbed, `TransientBackpressure` is reported only through
//! stats, and `ListenerError` never escapes the listener dispatch loop. Only
//! `PreconditionError` and `Timeout` are surfaced to a public-API caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the Sendspin server and client.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum SendspinError {
    /// Peer violated the handshake or message sequencing rules. The caller
    /// already closed the socket with 1008 by the time this is observed.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A timed operation (connect, hello, initial state, graceful close)
    /// did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The caller attempted an operation whose precondition was not met
    /// (e.g. sending source audio before time-sync, acting on a closed
    /// session).
    #[error("precondition failed: {0}")]
    PreconditionError(String),

    /// Construction-time validation failure (e.g. a role declared without
    /// its capability block).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Transport-level failure opening or writing to a socket.
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal error that should not normally surface.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SendspinError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProtocolViolation(_) | Self::PreconditionError(_) | Self::Configuration(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ErrorCode for SendspinError {
    fn code(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Timeout(_) => "timeout",
            Self::PreconditionError(_) => "precondition_error",
            Self::Configuration(_) => "configuration_error",
            Self::Transport(_) => "transport_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenient Result alias for Sendspin operations.
pub type SendspinResult<T> = Result<T, SendspinError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for SendspinError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_error_returns_bad_request() {
        let err = SendspinError::PreconditionError("not synchronized".into());
        assert_eq!(err.code(), "precondition_error");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn timeout_returns_gateway_timeout() {
        let err = SendspinError::Timeout("hello".into());
        assert_eq!(err.code(), "timeout");
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
