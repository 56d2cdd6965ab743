//! Gateway behavior against a simulated upstream: retry masking, caching,
//! concurrency bounds, and error propagation.

mod common;

use std::sync::atomic::Ordering;

use futures::future::join_all;
use serde_json::json;
use wiremock::matchers::{method as http_method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    fast_gateway_config, mount_method, quantity, rpc_method, rpc_rate_limited, rpc_result,
    rpc_server_error, test_chain,
};

#[tokio::test]
async fn chain_id_is_fetched_upstream_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_chainId"))
        .respond_with(rpc_result(json!("0x1")))
        .expect(1)
        .mount(&server)
        .await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());

    // Many concurrent callers coalesce into a single upstream invocation.
    let results = join_all((0..8).map(|_| chain.chain_id())).await;
    for result in results {
        assert_eq!(result.unwrap(), "0x1");
    }

    // And later callers are served from the cache.
    assert_eq!(chain.chain_id().await.unwrap(), "0x1");
    server.verify().await;
}

#[tokio::test]
async fn rate_limits_are_retried_and_masked_from_the_caller() {
    let server = MockServer::start().await;

    // Two 429s, then success: the caller must only ever see the success.
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_blockNumber"))
        .respond_with(rpc_rate_limited())
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_method(&server, "eth_blockNumber", json!(quantity(199))).await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());

    assert_eq!(chain.block_number().await.unwrap(), 199);
    assert_eq!(
        chain.gateway().metrics().retries.load(Ordering::Relaxed),
        2
    );
}

#[tokio::test]
async fn embedded_rate_limit_codes_are_retried_too() {
    let server = MockServer::start().await;

    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_blockNumber"))
        .respond_with(common::rpc_error(429, "Too Many Requests"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_method(&server, "eth_blockNumber", json!(quantity(7))).await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());
    assert_eq!(chain.block_number().await.unwrap(), 7);
}

#[tokio::test]
async fn non_retryable_errors_propagate_immediately() {
    let server = MockServer::start().await;
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_blockNumber"))
        .respond_with(rpc_server_error())
        .mount(&server)
        .await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());

    let err = chain.block_number().await.unwrap_err();
    assert!(!err.is_rate_limit());
    // One dispatch, zero retries.
    assert_eq!(
        chain.gateway().metrics().dispatched.load(Ordering::Relaxed),
        1
    );
    assert_eq!(chain.gateway().metrics().retries.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn persistent_rate_limit_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_blockNumber"))
        .respond_with(rpc_rate_limited())
        .mount(&server)
        .await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());

    let err = chain.block_number().await.unwrap_err();
    // Surfaced as exhaustion, which downstream flow control still classifies
    // as a rate-limit signal.
    assert!(err.is_rate_limit());
    // Initial attempt + max_retries dispatches.
    assert_eq!(
        chain.gateway().metrics().dispatched.load(Ordering::Relaxed),
        6
    );
}

#[tokio::test]
async fn in_flight_calls_never_exceed_the_concurrency_cap() {
    let server = MockServer::start().await;
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_blockNumber"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"}))
                .set_delay(std::time::Duration::from_millis(30)),
        )
        .mount(&server)
        .await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());

    let results = join_all((0..20).map(|_| chain.block_number())).await;
    for result in results {
        assert_eq!(result.unwrap(), 1);
    }

    let metrics = chain.gateway().metrics();
    assert_eq!(metrics.dispatched.load(Ordering::Relaxed), 20);
    assert!(metrics.max_in_flight.load(Ordering::Relaxed) <= 5);
}
