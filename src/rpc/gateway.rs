//! The RPC gateway: single choke point for every upstream call.
//!
//! Callers submit `(method, params)` pairs and await the result; the gateway
//! owns a FIFO pending queue, a bounded in-flight window, a process-wide
//! throttle gate, and per-request retry with exponential backoff and jitter.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            RpcGateway                                │
//! │                                                                      │
//! │  call() ──┐                                                          │
//! │  call() ──┼─▶ mailbox ──▶ ┌──────────┐  dispatch   ┌──────────────┐  │
//! │  call() ──┘               │   Pump   │────────────▶│ worker tasks │  │
//! │                           │ (queue,  │◀────────────│ (transport)  │  │
//! │                           │  gate,   │ completions └──────────────┘  │
//! │                           │  cap)    │                               │
//! │                           └──────────┘                               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All shared state (queue, in-flight counter, throttle gate) is owned by the
//! pump task; submissions and completions arrive as mailbox messages, so the
//! concurrency cap needs no locks.
//!
//! # Retry policy
//!
//! Only failures matching the rate-limit predicate are retried, up to
//! `max_retries` times with delay `min(base · 2^attempt + jitter, max)`. Any
//! other failure propagates to the caller immediately. While the throttle
//! gate is closed no queued request is dispatched; in-flight requests
//! complete naturally.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{OnceCell, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::transport::RpcTransport;
use crate::error::RpcError;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Pluggable rate-limit detection over upstream errors.
pub type RateLimitPredicate = Arc<dyn Fn(&RpcError) -> bool + Send + Sync>;

/// Tunables for the gateway scheduler.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum calls outstanding against the upstream at any instant.
    pub max_concurrent: usize,
    /// Retries per request on rate-limit signals.
    pub max_retries: u32,
    /// Base retry delay; doubled per attempt.
    pub base_delay: Duration,
    /// Upper bound on any single retry delay.
    pub max_delay: Duration,
    /// Uniform random jitter added to each retry delay.
    pub jitter: Duration,
    /// Mailbox depth before submitters are backpressured.
    pub queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(1000),
            queue_capacity: 1024,
        }
    }
}

/// Counters maintained by the pump, exposed for observability and tests.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Requests handed to a worker.
    pub dispatched: AtomicU64,
    /// Rate-limit retries scheduled.
    pub retries: AtomicU64,
    /// Currently outstanding upstream calls.
    pub in_flight: AtomicU64,
    /// High-water mark of `in_flight`.
    pub max_in_flight: AtomicU64,
}

impl GatewayMetrics {
    fn on_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_in_flight.fetch_max(now, Ordering::Relaxed);
    }

    fn on_complete(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

/// A pending or in-flight upstream call.
///
/// Created on submission, destroyed on terminal resolution: success,
/// retries exhausted, or a non-retryable failure.
struct QueuedRequest {
    method: String,
    params: Value,
    attempts: u32,
    responder: oneshot::Sender<Result<Value, RpcError>>,
}

enum PumpMessage {
    Submit(QueuedRequest),
    Completed { throttle: Option<Duration> },
}

// ═══════════════════════════════════════════════════════════════════════════════
// GATEWAY
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for submitting upstream calls.
///
/// Cheap to clone-by-Arc and share across tasks. Dropping every handle (or
/// cancelling the shutdown token) stops the pump; calls submitted afterwards
/// fail with [`RpcError::GatewayClosed`].
#[derive(Debug)]
pub struct RpcGateway {
    pump_tx: mpsc::Sender<PumpMessage>,
    /// `eth_chainId` is immutable for the process lifetime; the first
    /// successful response is memoized here.
    chain_id: OnceCell<String>,
    metrics: Arc<GatewayMetrics>,
}

impl RpcGateway {
    /// Spawn the pump task and return the submission handle.
    #[must_use]
    pub fn spawn(
        transport: Arc<RpcTransport>,
        config: GatewayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self::spawn_with_predicate(
            transport,
            config,
            Arc::new(RpcError::is_rate_limit),
            shutdown,
        )
    }

    /// Spawn with a custom rate-limit predicate.
    #[must_use]
    pub fn spawn_with_predicate(
        transport: Arc<RpcTransport>,
        config: GatewayConfig,
        predicate: RateLimitPredicate,
        shutdown: CancellationToken,
    ) -> Self {
        let (pump_tx, pump_rx) = mpsc::channel(config.queue_capacity);
        let metrics = Arc::new(GatewayMetrics::default());

        let pump = Pump {
            transport,
            config,
            predicate,
            metrics: Arc::clone(&metrics),
            self_tx: pump_tx.clone(),
            pending: VecDeque::new(),
            in_flight: 0,
            throttle_until: None,
        };
        tokio::spawn(pump.run(pump_rx, shutdown));

        Self {
            pump_tx,
            chain_id: OnceCell::new(),
            metrics,
        }
    }

    /// Submit a call and await its terminal result.
    ///
    /// `eth_chainId` is served from the process-lifetime cache after the
    /// first success; concurrent first callers coalesce into one upstream
    /// invocation.
    ///
    /// # Errors
    ///
    /// Propagates the upstream failure, [`RpcError::RetriesExhausted`] when
    /// rate-limit retries run out, or [`RpcError::GatewayClosed`] after
    /// shutdown.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if method == "eth_chainId" {
            let cached = self
                .chain_id
                .get_or_try_init(|| async {
                    let value = self.submit(method.to_string(), params).await?;
                    value
                        .as_str()
                        .map(ToOwned::to_owned)
                        .ok_or_else(|| {
                            RpcError::InvalidResponse("eth_chainId result is not a string".into())
                        })
                })
                .await?;
            return Ok(Value::String(cached.clone()));
        }

        self.submit(method.to_string(), params).await
    }

    /// Scheduler counters (dispatches, retries, in-flight high-water mark).
    #[must_use]
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    async fn submit(&self, method: String, params: Value) -> Result<Value, RpcError> {
        let (responder, receiver) = oneshot::channel();
        let request = QueuedRequest {
            method,
            params,
            attempts: 0,
            responder,
        };

        self.pump_tx
            .send(PumpMessage::Submit(request))
            .await
            .map_err(|_| RpcError::GatewayClosed)?;

        receiver.await.map_err(|_| RpcError::GatewayClosed)?
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PUMP
// ═══════════════════════════════════════════════════════════════════════════════

/// The single task owning queue, in-flight counter, and throttle gate.
struct Pump {
    transport: Arc<RpcTransport>,
    config: GatewayConfig,
    predicate: RateLimitPredicate,
    metrics: Arc<GatewayMetrics>,
    self_tx: mpsc::Sender<PumpMessage>,
    pending: VecDeque<QueuedRequest>,
    in_flight: usize,
    throttle_until: Option<Instant>,
}

impl Pump {
    async fn run(mut self, mut rx: mpsc::Receiver<PumpMessage>, shutdown: CancellationToken) {
        loop {
            self.clear_expired_gate();
            self.dispatch_ready();

            let gate = self.throttle_until;
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(
                        pending = self.pending.len(),
                        in_flight = self.in_flight,
                        "Gateway pump shutting down"
                    );
                    break;
                }
                message = rx.recv() => match message {
                    Some(PumpMessage::Submit(request)) => self.pending.push_back(request),
                    Some(PumpMessage::Completed { throttle }) => {
                        self.in_flight -= 1;
                        self.metrics.on_complete();
                        if let Some(backoff) = throttle {
                            self.close_gate(backoff);
                        }
                    }
                    None => break,
                },
                () = tokio::time::sleep_until(gate.unwrap_or_else(Instant::now)),
                    if gate.is_some() => {
                    trace!("Throttle gate released");
                }
            }
        }
    }

    /// Set the gate to `now + backoff`, never moving an existing gate earlier.
    fn close_gate(&mut self, backoff: Duration) {
        let until = Instant::now() + backoff;
        let effective = self.throttle_until.map_or(until, |t| t.max(until));
        if self.throttle_until != Some(effective) {
            warn!(backoff_ms = backoff.as_millis() as u64, "Throttle gate closed");
        }
        self.throttle_until = Some(effective);
    }

    fn clear_expired_gate(&mut self) {
        if self.throttle_until.is_some_and(|t| Instant::now() >= t) {
            self.throttle_until = None;
        }
    }

    /// Drain the FIFO queue while the gate is open and slots are free.
    fn dispatch_ready(&mut self) {
        while self.in_flight < self.config.max_concurrent && self.throttle_until.is_none() {
            let Some(request) = self.pending.pop_front() else {
                break;
            };

            self.in_flight += 1;
            self.metrics.on_dispatch();
            trace!(
                method = %request.method,
                attempt = request.attempts,
                in_flight = self.in_flight,
                "Dispatching request"
            );

            tokio::spawn(execute_request(
                request,
                Arc::clone(&self.transport),
                self.self_tx.clone(),
                self.config.clone(),
                Arc::clone(&self.predicate),
                Arc::clone(&self.metrics),
            ));
        }
    }
}

/// Worker: one upstream attempt, then classification.
///
/// Rate-limited requests free their slot immediately and re-enter the queue
/// after the backoff; everything else resolves the waiter.
async fn execute_request(
    request: QueuedRequest,
    transport: Arc<RpcTransport>,
    pump_tx: mpsc::Sender<PumpMessage>,
    config: GatewayConfig,
    predicate: RateLimitPredicate,
    metrics: Arc<GatewayMetrics>,
) {
    let result = transport.execute(&request.method, &request.params).await;

    match result {
        Ok(value) => {
            let _ = pump_tx.send(PumpMessage::Completed { throttle: None }).await;
            let _ = request.responder.send(Ok(value));
        }
        Err(err) if predicate(&err) => {
            let attempts = request.attempts + 1;
            let backoff = retry_delay(&config, request.attempts);
            let _ = pump_tx
                .send(PumpMessage::Completed {
                    throttle: Some(backoff),
                })
                .await;

            if attempts > config.max_retries {
                warn!(
                    method = %request.method,
                    attempts,
                    "Rate limit retries exhausted"
                );
                let _ = request.responder.send(Err(RpcError::RetriesExhausted {
                    method: request.method,
                    attempts,
                }));
            } else {
                debug!(
                    method = %request.method,
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, re-queueing"
                );
                metrics.retries.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    let _ = pump_tx
                        .send(PumpMessage::Submit(QueuedRequest {
                            attempts,
                            ..request
                        }))
                        .await;
                });
            }
        }
        Err(err) => {
            let _ = pump_tx.send(PumpMessage::Completed { throttle: None }).await;
            let _ = request.responder.send(Err(err));
        }
    }
}

/// Delay for retry attempt `n`: `min(base · 2^n + U[0, jitter), max)`.
fn retry_delay(config: &GatewayConfig, attempt: u32) -> Duration {
    let base_ms = u64::try_from(config.base_delay.as_millis()).unwrap_or(u64::MAX);
    let jitter_ms = u64::try_from(config.jitter.as_millis()).unwrap_or(0);

    let exp = 1u64 << attempt.min(16);
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..jitter_ms)
    };

    let delay_ms = base_ms.saturating_mul(exp).saturating_add(jitter);
    Duration::from_millis(delay_ms).min(config.max_delay)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_config() -> GatewayConfig {
        GatewayConfig {
            jitter: Duration::ZERO,
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let config = no_jitter_config();
        assert_eq!(retry_delay(&config, 0), Duration::from_secs(1));
        assert_eq!(retry_delay(&config, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(&config, 2), Duration::from_secs(4));
    }

    #[test]
    fn retry_delay_is_capped() {
        let config = no_jitter_config();
        assert_eq!(retry_delay(&config, 10), Duration::from_secs(30));
        // Huge attempt counts must not overflow
        assert_eq!(retry_delay(&config, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn retry_delay_jitter_stays_in_bounds() {
        let config = GatewayConfig::default();
        for _ in 0..100 {
            let delay = retry_delay(&config, 0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(2) + Duration::from_millis(1));
        }
    }

    #[test]
    fn metrics_track_high_water_mark() {
        let metrics = GatewayMetrics::default();
        metrics.on_dispatch();
        metrics.on_dispatch();
        metrics.on_complete();
        metrics.on_dispatch();

        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.max_in_flight.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.dispatched.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn default_config_matches_operational_policy() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }
}
