//! Shared helpers for integration tests.
//!
//! The upstream node is simulated with wiremock: helpers here build
//! JSON-RPC envelopes, canned log/block payloads, and fast-timing component
//! configs so retry/backoff paths run in milliseconds.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method as http_method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use transfer_indexer::indexer::BackfillSettings;
use transfer_indexer::rpc::{ChainClient, GatewayConfig, RpcGateway, RpcTransport};
use transfer_indexer::store::SqliteStore;

/// The tracked contract used across tests.
pub const CONTRACT: &str = "0x1111111111111111111111111111111111111111";

/// Transfer topic0, matching the crate constant.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

// ═══════════════════════════════════════════════════════════════════════════════
// JSON-RPC RESPONSES
// ═══════════════════════════════════════════════════════════════════════════════

/// Successful JSON-RPC envelope around `result`.
pub fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result
    }))
}

/// HTTP-level 429.
pub fn rpc_rate_limited() -> ResponseTemplate {
    ResponseTemplate::new(429).set_body_string("Too Many Requests")
}

/// JSON-RPC error object with the given code.
pub fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message }
    }))
}

/// HTTP-level server failure.
pub fn rpc_server_error() -> ResponseTemplate {
    ResponseTemplate::new(500).set_body_string("internal server error")
}

/// Matcher for a JSON-RPC method.
pub fn rpc_method(name: &str) -> impl Match + use<> {
    body_partial_json(json!({ "method": name }))
}

/// Mount a catch-all success for `method`.
pub async fn mount_method(server: &MockServer, method_name: &str, result: Value) {
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method(method_name))
        .respond_with(rpc_result(result))
        .mount(server)
        .await;
}

/// Count received requests for a JSON-RPC method.
pub async fn requests_for(server: &MockServer, method_name: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| body_method(r).as_deref() == Some(method_name))
        .count()
}

fn body_method(request: &Request) -> Option<String> {
    let body: Value = serde_json::from_slice(&request.body).ok()?;
    body.get("method")?.as_str().map(ToOwned::to_owned)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════════

/// A raw `eth_getLogs` entry for a Transfer of `value` (decimal string).
pub fn transfer_log_json(
    tx_hash: &str,
    log_index: u64,
    block: u64,
    from: &str,
    to: &str,
    value: &str,
) -> Value {
    let amount: u128 = value.parse().expect("test value fits u128");
    json!({
        "address": CONTRACT,
        "topics": [
            TRANSFER_TOPIC,
            address_topic(from),
            address_topic(to),
        ],
        "data": format!("0x{amount:064x}"),
        "blockNumber": format!("0x{block:x}"),
        "blockHash": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "logIndex": format!("0x{log_index:x}"),
        "removed": false
    })
}

/// Left-pad an address into a 32-byte topic. Case is preserved so tests can
/// prove the pipeline lowercases on its own.
pub fn address_topic(address: &str) -> String {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    format!("0x{stripped:0>64}")
}

/// Minimal `eth_getBlockByNumber` payload carrying a timestamp.
pub fn block_json(number: u64, timestamp: i64) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "timestamp": format!("0x{timestamp:x}")
    })
}

/// Hex quantity helper.
pub fn quantity(n: u64) -> String {
    format!("0x{n:x}")
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT WIRING
// ═══════════════════════════════════════════════════════════════════════════════

/// Gateway config with millisecond-scale delays for fast tests.
pub fn fast_gateway_config() -> GatewayConfig {
    GatewayConfig {
        max_concurrent: 5,
        max_retries: 5,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(40),
        jitter: Duration::ZERO,
        queue_capacity: 256,
    }
}

/// Backfill settings with millisecond-scale sleeps.
pub fn fast_backfill_settings(start_block: u64, initial_batch_size: u64) -> BackfillSettings {
    BackfillSettings {
        start_block,
        initial_batch_size,
        rate_limit_backoff: Duration::from_millis(2),
        rate_limit_backoff_cap: Duration::from_millis(20),
        floor_backoff: Duration::from_millis(2),
        floor_backoff_cap: Duration::from_millis(20),
        ..BackfillSettings::default()
    }
}

/// Spin up a chain client over a gateway pointed at the mock server.
pub fn test_chain(server: &MockServer, config: GatewayConfig) -> (Arc<ChainClient>, CancellationToken) {
    let shutdown = CancellationToken::new();
    let transport = Arc::new(
        RpcTransport::new(server.uri(), Duration::from_secs(5)).expect("transport"),
    );
    let gateway = Arc::new(RpcGateway::spawn(transport, config, shutdown.clone()));
    (Arc::new(ChainClient::new(gateway)), shutdown)
}

/// Fresh in-memory store with migrations applied.
pub async fn memory_store() -> Arc<SqliteStore> {
    let store = SqliteStore::connect(":memory:").await.expect("store");
    store.run_migrations().await.expect("migrations");
    Arc::new(store)
}
