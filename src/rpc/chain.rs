//! Typed Ethereum JSON-RPC helpers on top of the gateway.
//!
//! Every method here builds raw params, submits through [`RpcGateway::call`],
//! and parses the result. Block timestamps are immutable once a block is
//! final, so they are cached aggressively and shared by the backfill and
//! live-tail paths.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Log;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::instrument;

use super::gateway::RpcGateway;
use crate::error::RpcError;
use crate::types::TRANSFER_EVENT_TOPIC;

/// Maximum number of block timestamps to cache.
const BLOCK_CACHE_MAX_CAPACITY: u64 = 10_000;

/// Time-to-live for cached block timestamps.
const BLOCK_CACHE_TTL: Duration = Duration::from_secs(3600);

// ═══════════════════════════════════════════════════════════════════════════════
// LOG FILTER
// ═══════════════════════════════════════════════════════════════════════════════

/// `eth_getLogs` / `eth_newFilter` parameter object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    /// Starting block (hex quantity or tag like "latest").
    pub from_block: String,
    /// Ending block (hex quantity or tag).
    pub to_block: String,
    /// Contract address to filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Topic filter; position 0 is the event signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<B256>>,
}

impl LogFilter {
    /// Transfer logs for `contract` over the inclusive range `[from, to]`.
    #[must_use]
    pub fn transfers(contract: Address, from: u64, to: u64) -> Self {
        Self {
            from_block: to_quantity(from),
            to_block: to_quantity(to),
            address: Some(contract),
            topics: Some(vec![TRANSFER_EVENT_TOPIC]),
        }
    }

    /// Transfer logs for `contract` from the chain tip onwards, for
    /// `eth_newFilter` subscriptions.
    #[must_use]
    pub fn transfers_at_tip(contract: Address) -> Self {
        Self {
            from_block: "latest".to_string(),
            to_block: "latest".to_string(),
            address: Some(contract),
            topics: Some(vec![TRANSFER_EVENT_TOPIC]),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Typed view of the upstream chain, backed by the gateway.
pub struct ChainClient {
    gateway: Arc<RpcGateway>,
    /// Block number → header timestamp. Immutable data, long TTL.
    block_timestamps: Cache<u64, i64>,
}

impl fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainClient")
            .field("gateway", &self.gateway)
            .field(
                "block_timestamps",
                &format!("<Cache entries={}>", self.block_timestamps.entry_count()),
            )
            .finish()
    }
}

impl ChainClient {
    /// Create a new chain client over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<RpcGateway>) -> Self {
        let block_timestamps = Cache::builder()
            .max_capacity(BLOCK_CACHE_MAX_CAPACITY)
            .time_to_live(BLOCK_CACHE_TTL)
            .build();

        Self {
            gateway,
            block_timestamps,
        }
    }

    /// The gateway this client submits through.
    #[must_use]
    pub fn gateway(&self) -> &Arc<RpcGateway> {
        &self.gateway
    }

    /// `eth_chainId`, served from the gateway's process-lifetime cache.
    ///
    /// # Errors
    /// Propagates upstream failures.
    pub async fn chain_id(&self) -> Result<String, RpcError> {
        let value = self.gateway.call("eth_chainId", json!([])).await?;
        value
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| RpcError::InvalidResponse("eth_chainId: not a string".into()))
    }

    /// `eth_blockNumber` as an integer.
    ///
    /// # Errors
    /// Propagates upstream failures.
    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let value = self.gateway.call("eth_blockNumber", json!([])).await?;
        parse_quantity("eth_blockNumber", &value)
    }

    /// `eth_getCode` at the latest block.
    ///
    /// # Errors
    /// Propagates upstream failures.
    pub async fn get_code(&self, address: Address) -> Result<String, RpcError> {
        let value = self
            .gateway
            .call("eth_getCode", json!([address, "latest"]))
            .await?;
        value
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| RpcError::InvalidResponse("eth_getCode: not a string".into()))
    }

    /// `eth_getTransactionCount` for `address` at historical `block`.
    ///
    /// # Errors
    /// Propagates upstream failures.
    pub async fn transaction_count(&self, address: Address, block: u64) -> Result<u64, RpcError> {
        let value = self
            .gateway
            .call(
                "eth_getTransactionCount",
                json!([address, to_quantity(block)]),
            )
            .await?;
        parse_quantity("eth_getTransactionCount", &value)
    }

    /// `eth_getLogs` for the given filter.
    ///
    /// # Errors
    /// Propagates upstream failures.
    #[instrument(skip(self, filter), fields(from = %filter.from_block, to = %filter.to_block))]
    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        let value = self.gateway.call("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::InvalidResponse(format!("eth_getLogs: {e}")))
    }

    /// `eth_newFilter`; returns the filter id for later polling.
    ///
    /// # Errors
    /// Propagates upstream failures.
    pub async fn new_filter(&self, filter: &LogFilter) -> Result<String, RpcError> {
        let value = self.gateway.call("eth_newFilter", json!([filter])).await?;
        value
            .as_str()
            .map(ToOwned::to_owned)
            .ok_or_else(|| RpcError::InvalidResponse("eth_newFilter: not a string".into()))
    }

    /// `eth_getFilterChanges`: logs accumulated since the previous poll.
    ///
    /// # Errors
    /// Propagates upstream failures.
    pub async fn filter_changes(&self, filter_id: &str) -> Result<Vec<Log>, RpcError> {
        let value = self
            .gateway
            .call("eth_getFilterChanges", json!([filter_id]))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::InvalidResponse(format!("eth_getFilterChanges: {e}")))
    }

    /// Header timestamp for `block`, fetched via `eth_getBlockByNumber` and
    /// cached.
    ///
    /// # Errors
    /// Propagates upstream failures; fails if the block is unknown upstream.
    pub async fn block_timestamp(&self, block: u64) -> Result<DateTime<Utc>, RpcError> {
        if let Some(secs) = self.block_timestamps.get(&block).await {
            return timestamp_from_secs(secs);
        }

        let value = self
            .gateway
            .call("eth_getBlockByNumber", json!([to_quantity(block), false]))
            .await?;
        if value.is_null() {
            return Err(RpcError::InvalidResponse(format!("block {block} not found")));
        }

        let raw = value.get("timestamp").ok_or_else(|| {
            RpcError::InvalidResponse(format!("block {block}: missing timestamp"))
        })?;
        let secs = i64::try_from(parse_quantity("eth_getBlockByNumber", raw)?)
            .map_err(|_| RpcError::InvalidResponse(format!("block {block}: timestamp overflow")))?;

        self.block_timestamps.insert(block, secs).await;
        timestamp_from_secs(secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEX QUANTITY HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Encode an integer as a 0x-prefixed hex quantity.
#[must_use]
pub fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Parse a 0x-prefixed hex quantity.
///
/// # Errors
/// Returns [`RpcError::InvalidResponse`] when the value is not a hex string.
pub fn parse_quantity(context: &str, value: &Value) -> Result<u64, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("{context}: not a quantity")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| RpcError::InvalidResponse(format!("{context}: bad quantity {s}")))
}

fn timestamp_from_secs(secs: i64) -> Result<DateTime<Utc>, RpcError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| RpcError::InvalidResponse(format!("invalid timestamp: {secs}")))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
