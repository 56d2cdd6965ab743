//! Backfill engine end-to-end against a simulated upstream: fresh starts,
//! resumption, adaptive sizing under rate limits, range skipping, and
//! idempotent re-runs.

mod common;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method as http_method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    CONTRACT, block_json, fast_backfill_settings, fast_gateway_config, memory_store,
    mount_method, quantity, requests_for, rpc_method, rpc_rate_limited, rpc_server_error,
    test_chain, transfer_log_json,
};
use transfer_indexer::indexer::BackfillEngine;
use transfer_indexer::ports::EventStore;
use transfer_indexer::types::EventQuery;

const TX_AA: &str = "0xaa00000000000000000000000000000000000000000000000000000000000000";

/// The block ranges requested via `eth_getLogs`, in arrival order.
async fn log_ranges(server: &MockServer) -> Vec<(String, String)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| {
            let body: Value = serde_json::from_slice(&r.body).ok()?;
            if body.get("method")?.as_str()? != "eth_getLogs" {
                return None;
            }
            let filter = body.get("params")?.get(0)?;
            Some((
                filter.get("fromBlock")?.as_str()?.to_owned(),
                filter.get("toBlock")?.as_str()?.to_owned(),
            ))
        })
        .collect()
}

#[tokio::test]
async fn fresh_start_ingests_small_range() {
    let server = MockServer::start().await;
    mount_method(&server, "eth_blockNumber", json!(quantity(105))).await;
    mount_method(
        &server,
        "eth_getLogs",
        json!([transfer_log_json(
            TX_AA,
            0,
            103,
            // Checksummed on the wire, lowercased in the store.
            "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01",
            "0xDeAdBeefDeadBeefDeadBeefDeadBeefDeadBeef",
            "42",
        )]),
    )
    .await;
    mount_method(&server, "eth_getBlockByNumber", block_json(103, 1_700_000_000)).await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());
    let store = memory_store().await;
    let engine = BackfillEngine::new(
        chain,
        Arc::clone(&store),
        CONTRACT.parse().unwrap(),
        fast_backfill_settings(100, 1000),
    );

    engine.run(CancellationToken::new()).await.unwrap();

    let page = store.get_events(&EventQuery { page: 1, page_size: 50, ..EventQuery::default() })
        .await
        .unwrap();
    assert_eq!(page.total_count, 1);
    let event = &page.events[0];
    assert_eq!(event.block_number, 103);
    assert_eq!(event.from.to_hex(), "0xabcdef0123456789abcdef0123456789abcdef01");
    assert_eq!(event.to.to_hex(), "0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef");
    assert_eq!(event.value.to_decimal(), "42");
    assert_eq!(event.timestamp.timestamp(), 1_700_000_000);

    assert_eq!(store.get_cursor("batch-sync").await.unwrap(), Some(105));
    // The whole range fits one batch.
    assert_eq!(requests_for(&server, "eth_getLogs").await, 1);
}

#[tokio::test]
async fn resume_requests_only_blocks_past_the_cursor() {
    let server = MockServer::start().await;
    mount_method(&server, "eth_blockNumber", json!(quantity(52))).await;
    // Only the range [51, 52] is answered; any other range would 404 and the
    // cursor would never reach 52.
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_getLogs"))
        .and(body_partial_json(json!({
            "params": [{ "fromBlock": "0x33", "toBlock": "0x34" }]
        })))
        .respond_with(common::rpc_result(json!([transfer_log_json(
            TX_AA,
            0,
            52,
            "0xabcdef0123456789abcdef0123456789abcdef01",
            "0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
            "7",
        )])))
        .mount(&server)
        .await;
    mount_method(&server, "eth_getBlockByNumber", block_json(52, 1_700_000_100)).await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());
    let store = memory_store().await;
    store.create_cursor("batch-sync", 50).await.unwrap();

    let engine = BackfillEngine::new(
        chain,
        Arc::clone(&store),
        CONTRACT.parse().unwrap(),
        fast_backfill_settings(0, 1000),
    );
    engine.run(CancellationToken::new()).await.unwrap();

    assert_eq!(store.get_cursor("batch-sync").await.unwrap(), Some(52));
    assert_eq!(requests_for(&server, "eth_getLogs").await, 1);
}

#[tokio::test]
async fn rate_limited_batches_halve_and_retry_the_same_range() {
    let server = MockServer::start().await;
    mount_method(&server, "eth_blockNumber", json!(quantity(300))).await;
    // First two log fetches are throttled, everything afterwards succeeds.
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_getLogs"))
        .respond_with(rpc_rate_limited())
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_method(&server, "eth_getLogs", json!([])).await;

    let (chain, _shutdown) = test_chain(
        &server,
        // No gateway-level retries: the 429 reaches the engine directly.
        transfer_indexer::rpc::GatewayConfig {
            max_retries: 0,
            ..fast_gateway_config()
        },
    );
    let store = memory_store().await;
    let engine = BackfillEngine::new(
        chain,
        Arc::clone(&store),
        CONTRACT.parse().unwrap(),
        fast_backfill_settings(1, 200),
    );
    engine.run(CancellationToken::new()).await.unwrap();

    let ranges = log_ranges(&server).await;
    // Same `from` retried with a halved window each time.
    assert_eq!(ranges[0], ("0x1".into(), quantity(200)));
    assert_eq!(ranges[1], ("0x1".into(), quantity(100)));
    assert_eq!(ranges[2], ("0x1".into(), quantity(50)));

    assert_eq!(store.get_cursor("batch-sync").await.unwrap(), Some(300));
}

#[tokio::test]
async fn non_rate_limit_failures_skip_the_range() {
    let server = MockServer::start().await;
    mount_method(&server, "eth_blockNumber", json!(quantity(250))).await;
    // [100, 199] consistently explodes; the rest of history is fine.
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_getLogs"))
        .and(body_partial_json(json!({
            "params": [{ "fromBlock": "0x64" }]
        })))
        .respond_with(rpc_server_error())
        .mount(&server)
        .await;
    mount_method(&server, "eth_getLogs", json!([])).await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());
    let store = memory_store().await;
    let engine = BackfillEngine::new(
        chain,
        Arc::clone(&store),
        CONTRACT.parse().unwrap(),
        fast_backfill_settings(100, 100),
    );
    engine.run(CancellationToken::new()).await.unwrap();

    // The bad range was attempted once, not retried, and the run carried on
    // past it.
    let ranges = log_ranges(&server).await;
    assert_eq!(
        ranges
            .iter()
            .filter(|(from, _)| from == "0x64")
            .count(),
        1
    );
    assert_eq!(store.get_cursor("batch-sync").await.unwrap(), Some(250));
}

#[tokio::test]
async fn rerunning_over_the_same_history_adds_no_duplicates() {
    let server = MockServer::start().await;
    mount_method(&server, "eth_blockNumber", json!(quantity(105))).await;
    mount_method(
        &server,
        "eth_getLogs",
        json!([transfer_log_json(
            TX_AA,
            0,
            103,
            "0xabcdef0123456789abcdef0123456789abcdef01",
            "0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
            "42",
        )]),
    )
    .await;
    mount_method(&server, "eth_getBlockByNumber", block_json(103, 1_700_000_000)).await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());
    let store = memory_store().await;
    let contract = CONTRACT.parse().unwrap();

    let engine = BackfillEngine::new(
        Arc::clone(&chain),
        Arc::clone(&store),
        contract,
        fast_backfill_settings(100, 1000),
    );
    engine.run(CancellationToken::new()).await.unwrap();
    let first_run = store.get_stats().await.unwrap().total_events;

    // Force the next run to re-walk the identical history.
    sqlx::query("UPDATE sync_cursors SET last_synced_block = 99 WHERE id = 'batch-sync'")
        .execute(store.pool())
        .await
        .unwrap();

    let second = BackfillEngine::new(
        chain,
        Arc::clone(&store),
        contract,
        fast_backfill_settings(100, 1000),
    );
    second.run(CancellationToken::new()).await.unwrap();

    let second_run = store.get_stats().await.unwrap().total_events;
    assert_eq!(first_run, 1);
    assert_eq!(second_run, first_run);
}

#[tokio::test]
async fn concurrent_runs_short_circuit_to_a_single_sweep() {
    let server = MockServer::start().await;
    mount_method(&server, "eth_blockNumber", json!(quantity(105))).await;
    Mock::given(http_method("POST"))
        .and(path("/"))
        .and(rpc_method("eth_getLogs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": []}))
                .set_delay(std::time::Duration::from_millis(50)),
        )
        .mount(&server)
        .await;

    let (chain, _shutdown) = test_chain(&server, fast_gateway_config());
    let store = memory_store().await;
    let engine = Arc::new(BackfillEngine::new(
        chain,
        Arc::clone(&store),
        CONTRACT.parse().unwrap(),
        fast_backfill_settings(100, 1000),
    ));

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(CancellationToken::new()).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(CancellationToken::new()).await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Only one runner actually swept the range.
    assert_eq!(requests_for(&server, "eth_getLogs").await, 1);
}
