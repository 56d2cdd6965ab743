//! Raw JSON-RPC transport over HTTP.
//!
//! Deliberately a thin `reqwest` client rather than a provider stack: the
//! gateway owns queueing, retries, and throttling, so the transport only
//! executes a single request and classifies the failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::error::RpcError;

/// Error details from a JSON-RPC error response.
#[derive(Debug, Deserialize)]
struct RpcErrorDetail {
    code: i64,
    message: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// One-shot JSON-RPC executor.
///
/// Each request carries a unique ID for correlation in logs. The client is
/// `Send + Sync` and designed for concurrent use; the per-request deadline is
/// the only cancellation the transport itself provides.
#[derive(Debug)]
pub struct RpcTransport {
    /// HTTP client for JSON-RPC requests.
    client: reqwest::Client,
    /// RPC endpoint URL.
    rpc_url: String,
    /// Request ID counter for JSON-RPC correlation.
    request_id: AtomicU64,
}

impl RpcTransport {
    /// Create a new transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Http {
                status: None,
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            request_id: AtomicU64::new(1),
        })
    }

    /// The endpoint this transport talks to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.rpc_url
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Execute a single JSON-RPC call and return the `result` value.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] when the HTTP deadline elapses
    /// - [`RpcError::Http`] for transport failures and non-2xx statuses
    /// - [`RpcError::Rpc`] when the node answers with an error object
    /// - [`RpcError::InvalidResponse`] when the envelope is malformed
    pub async fn execute(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let request_id = self.next_request_id();
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": request_id
        });

        trace!(method, request_id, "Dispatching JSON-RPC request");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout(format!("{method}: {e}"))
                } else {
                    RpcError::Http {
                        status: e.status().map(|s| s.as_u16()),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Http {
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(format!("{method}: {e}")))?;

        if let Some(error) = body.get("error") {
            let detail: RpcErrorDetail =
                serde_json::from_value(error.clone()).unwrap_or(RpcErrorDetail {
                    code: -1,
                    message: "unknown error".to_string(),
                });
            return Err(RpcError::Rpc {
                code: detail.code,
                message: detail.message,
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse(format!("{method}: missing result field")))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
