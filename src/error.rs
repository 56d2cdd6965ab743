//! Layered error types for the transfer indexer.
//!
//! This module provides a hierarchical error system:
//!
//! - [`RpcError`] - Upstream JSON-RPC failures, classified for retry decisions
//! - [`InfraError`] - Infrastructure errors (database, RPC, serialization)
//! - [`AppError`] - Application-level errors
//! - [`ApiError`] - HTTP API errors with status codes
//!
//! # Error Philosophy
//!
//! The ingestion pipeline never terminates the process on its own: loop
//! boundaries log and continue. Rate-limit signals are the one recoverable
//! class and are detected by a duck-typed predicate over [`RpcError`].

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// RPC ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// An upstream JSON-RPC call failure.
///
/// Carries enough structure for the rate-limit predicate: the HTTP status (if
/// the failure surfaced at the transport layer), the JSON-RPC error code (if
/// the node answered with an error object), and the message text.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// Transport-level HTTP failure (non-2xx status, connection error).
    #[error("HTTP error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http {
        /// HTTP status code, when one was received.
        status: Option<u16>,
        /// Error description.
        message: String,
    },

    /// JSON-RPC error object returned by the node.
    #[error("RPC error ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// Request exceeded the HTTP client deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Response did not match the expected JSON-RPC shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Retries on rate-limit signals were exhausted.
    #[error("rate limit retries exhausted for {method} after {attempts} attempts")]
    RetriesExhausted {
        /// The JSON-RPC method that kept being throttled.
        method: String,
        /// Total attempts made.
        attempts: u32,
    },

    /// The gateway has shut down and can no longer accept calls.
    #[error("rpc gateway closed")]
    GatewayClosed,
}

impl RpcError {
    /// Duck-typed rate-limit detection.
    ///
    /// A failure is a rate-limit signal if the HTTP status is 429, the
    /// JSON-RPC error code is 429, or the message contains the canonical
    /// "Too Many Requests" fragment. Exhausted retries stay classified as
    /// rate-limited so downstream flow control (batch halving) still sees
    /// them.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::Http { status, message } => {
                *status == Some(429) || message.contains("Too Many Requests")
            }
            Self::Rpc { code, message } => *code == 429 || message.contains("Too Many Requests"),
            Self::Timeout(message) | Self::InvalidResponse(message) => {
                message.contains("Too Many Requests")
            }
            Self::RetriesExhausted { .. } => true,
            Self::GatewayClosed => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Upstream RPC error.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Log decoding error.
    #[error("event decoding error: {0}")]
    EventDecoding(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors.
///
/// This is the primary error type used throughout the application.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// No code is deployed at the tracked contract address.
    #[error("no contract code at address {0}")]
    ContractNotFound(String),

    /// Invalid address supplied in configuration or a query.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization error.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl AppError {
    /// The underlying [`RpcError`], if this error originated upstream.
    #[must_use]
    pub const fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Infra(InfraError::Rpc(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        Self::Infra(InfraError::Rpc(err))
    }
}

impl From<crate::types::primitives::InvalidAddress> for AppError {
    fn from(err: crate::types::primitives::InvalidAddress) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

impl From<crate::types::events::DecodeError> for AppError {
    fn from(err: crate::types::events::DecodeError) -> Self {
        Self::Infra(InfraError::EventDecoding(err.to_string()))
    }
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped application error.
    #[error(transparent)]
    App(#[from] AppError),

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds until rate limit resets.
        retry_after_secs: u64,
    },

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::BadRequest(_) | Self::App(AppError::InvalidAddress(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string())
            }

            Self::RateLimited { retry_after_secs } => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("Retry-After", retry_after_secs.to_string())],
                    Json(json!({
                        "error": {
                            "code": "RATE_LIMITED",
                            "message": self.to_string(),
                            "retry_after_secs": retry_after_secs
                        }
                    })),
                )
                    .into_response();
            }

            // Infrastructure and internal errors: log but don't expose details
            Self::App(_) => {
                tracing::error!(error = ?self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_429_is_rate_limit() {
        let err = RpcError::Http {
            status: Some(429),
            message: "too many".into(),
        };
        assert!(err.is_rate_limit());
    }

    #[test]
    fn rpc_code_429_is_rate_limit() {
        let err = RpcError::Rpc {
            code: 429,
            message: "slow down".into(),
        };
        assert!(err.is_rate_limit());
    }

    #[test]
    fn message_fragment_is_rate_limit() {
        let err = RpcError::Rpc {
            code: -32005,
            message: "Too Many Requests".into(),
        };
        assert!(err.is_rate_limit());
    }

    #[test]
    fn exhausted_retries_stay_rate_limited() {
        let err = RpcError::RetriesExhausted {
            method: "eth_getLogs".into(),
            attempts: 5,
        };
        assert!(err.is_rate_limit());
    }

    #[test]
    fn server_error_is_not_rate_limit() {
        let err = RpcError::Http {
            status: Some(500),
            message: "internal".into(),
        };
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn app_error_exposes_rpc_source() {
        let app: AppError = RpcError::GatewayClosed.into();
        assert!(matches!(app.as_rpc(), Some(RpcError::GatewayClosed)));
    }
}
