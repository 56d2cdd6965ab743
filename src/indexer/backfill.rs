//! Backfill engine: historical ingestion in adaptive batches.
//!
//! Walks `[start, head]` where `start` comes from the `batch-sync` cursor,
//! the configured start block, or the creation-block locator, and `head` is
//! captured once at startup. Each batch is one `eth_getLogs` fetch plus a
//! header fetch per distinct block, all through the gateway.
//!
//! # Flow control
//!
//! The batch size reacts to upstream pressure the way TCP slow-start does:
//! it doubles back towards the configured initial size after a streak of
//! successes and halves down to a floor when a batch fails with a rate-limit
//! signal, retrying the same range after an exponential sleep. Failures that
//! are not rate limits skip the range to preserve liveness.
//!
//! # Durability
//!
//! The `batch-sync` cursor is the commit point: it advances to a batch's
//! upper bound only after that batch's events are durably saved, and never
//! moves backward. Skipped ranges leave the cursor behind, so a later run
//! re-attempts from one block past the last success.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::primitives::Address;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::locator::CreationBlockLocator;
use crate::error::{AppError, Result, RpcError};
use crate::ports::store::{BATCH_SYNC_CURSOR, EventStore};
use crate::rpc::{ChainClient, LogFilter};
use crate::types::TransferEvent;
use crate::types::events::DecodeError;

// ═══════════════════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables for the backfill engine.
#[derive(Debug, Clone)]
pub struct BackfillSettings {
    /// Configured start block; `0` delegates to the locator.
    pub start_block: u64,
    /// Starting and maximum batch size.
    pub initial_batch_size: u64,
    /// Batch size floor under rate-limit pressure.
    pub min_batch_size: u64,
    /// Consecutive successes before the batch size doubles.
    pub growth_streak: u32,
    /// Base sleep after a rate-limited batch (doubled per consecutive failure).
    pub rate_limit_backoff: Duration,
    /// Cap on the rate-limit sleep.
    pub rate_limit_backoff_cap: Duration,
    /// Base sleep when already at the batch size floor.
    pub floor_backoff: Duration,
    /// Cap on the floor sleep.
    pub floor_backoff_cap: Duration,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            start_block: 0,
            initial_batch_size: 1000,
            min_batch_size: 10,
            growth_streak: 5,
            rate_limit_backoff: Duration::from_millis(1000),
            rate_limit_backoff_cap: Duration::from_secs(60),
            floor_backoff: Duration::from_millis(5000),
            floor_backoff_cap: Duration::from_secs(300),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH SIZER
// ═══════════════════════════════════════════════════════════════════════════════

/// What a rate-limited batch did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizerAction {
    /// Window halved; retry the range after the normal backoff.
    Halved,
    /// Already at the floor; retry after the longer floor backoff.
    AtFloor,
}

/// Adaptive block-range window.
///
/// Grows back towards `initial` after a streak of successes, halves to
/// `min` on rate-limit failures.
#[derive(Debug)]
struct BatchSizer {
    current: u64,
    initial: u64,
    min: u64,
    growth_streak: u32,
    success_streak: u32,
    failure_streak: u32,
}

impl BatchSizer {
    fn new(settings: &BackfillSettings) -> Self {
        let min = settings.min_batch_size.max(1);
        Self {
            current: settings.initial_batch_size.max(min),
            initial: settings.initial_batch_size.max(min),
            min,
            growth_streak: settings.growth_streak.max(1),
            success_streak: 0,
            failure_streak: 0,
        }
    }

    const fn current(&self) -> u64 {
        self.current
    }

    fn on_success(&mut self) {
        self.failure_streak = 0;
        self.success_streak += 1;
        if self.success_streak >= self.growth_streak && self.current < self.initial {
            self.current = (self.current * 2).min(self.initial);
            self.success_streak = 0;
            debug!(batch_size = self.current, "Batch size increased");
        }
    }

    fn on_rate_limit(&mut self) -> (SizerAction, u32) {
        self.success_streak = 0;
        self.failure_streak += 1;
        if self.current > self.min {
            self.current = (self.current / 2).max(self.min);
            (SizerAction::Halved, self.failure_streak)
        } else {
            (SizerAction::AtFloor, self.failure_streak)
        }
    }

    fn on_skip(&mut self) {
        self.success_streak = 0;
    }
}

/// `min(base · 2^streak, cap)`.
fn escalating_backoff(base: Duration, streak: u32, cap: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(1u64 << streak.min(16));
    Duration::from_millis(delay_ms).min(cap)
}

// ═══════════════════════════════════════════════════════════════════════════════
// BACKFILL ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Historical ingestion engine for one tracked contract.
///
/// # Type Parameters
///
/// * `S` - Store implementation providing [`EventStore`]
#[derive(Debug)]
pub struct BackfillEngine<S> {
    chain: Arc<ChainClient>,
    store: Arc<S>,
    contract: Address,
    locator: CreationBlockLocator,
    settings: BackfillSettings,
    /// Single-runner sentinel; a second concurrent `run` short-circuits.
    is_indexing: AtomicBool,
}

impl<S> BackfillEngine<S>
where
    S: EventStore,
{
    /// Create a new backfill engine.
    pub fn new(
        chain: Arc<ChainClient>,
        store: Arc<S>,
        contract: Address,
        settings: BackfillSettings,
    ) -> Self {
        let locator =
            CreationBlockLocator::new(Arc::clone(&chain), contract, settings.start_block);
        Self {
            chain,
            store,
            contract,
            locator,
            settings,
            is_indexing: AtomicBool::new(false),
        }
    }

    /// Run the backfill to exhaustion of `[start, head@startup]`.
    ///
    /// Returns immediately if another `run` is already in progress. The
    /// engine does not chase a moving tip; catching up past the captured
    /// head is the live tailer's job.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails (cursor reads, head
    /// capture). Batch-level failures never abort the run: rate limits
    /// shrink the window and retry, anything else skips the range.
    #[instrument(skip(self, shutdown), fields(contract = %self.contract))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self
            .is_indexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Backfill already running, ignoring duplicate start");
            return Ok(());
        }

        let result = self.run_inner(&shutdown).await;
        self.is_indexing.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, shutdown: &CancellationToken) -> Result<()> {
        let start = self.resolve_start_block().await?;
        let head = self.chain.block_number().await.map_err(AppError::from)?;

        if start > head {
            info!(start, head, "Nothing to backfill, already at head");
            return Ok(());
        }

        info!(start, head, "Starting backfill");

        let mut sizer = BatchSizer::new(&self.settings);
        let mut from = start;

        while from <= head {
            if shutdown.is_cancelled() {
                info!(next_block = from, "Backfill interrupted by shutdown");
                return Ok(());
            }

            let to = from.saturating_add(sizer.current() - 1).min(head);

            match self.ingest_range(from, to).await {
                Ok(count) => {
                    info!(from, to, count, "Batch ingested");
                    sizer.on_success();
                    from = to + 1;
                }
                Err(err) if is_rate_limited(&err) => {
                    let (action, streak) = sizer.on_rate_limit();
                    let backoff = match action {
                        SizerAction::Halved => {
                            warn!(
                                from,
                                to,
                                batch_size = sizer.current(),
                                "Rate limited, halving batch and retrying range"
                            );
                            escalating_backoff(
                                self.settings.rate_limit_backoff,
                                streak,
                                self.settings.rate_limit_backoff_cap,
                            )
                        }
                        SizerAction::AtFloor => {
                            warn!(from, to, "Rate limited at minimum batch size, backing off");
                            escalating_backoff(
                                self.settings.floor_backoff,
                                streak,
                                self.settings.floor_backoff_cap,
                            )
                        }
                    };
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            info!(next_block = from, "Backfill interrupted by shutdown");
                            return Ok(());
                        }
                        () = sleep(backoff) => {}
                    }
                    // Same `from`: the range is retried, not skipped.
                }
                Err(err) => {
                    error!(
                        from,
                        to,
                        error = %err,
                        "Skipping range after non-rate-limit failure"
                    );
                    sizer.on_skip();
                    from = to + 1;
                }
            }
        }

        info!(head, "Backfill complete");
        Ok(())
    }

    /// Determine the first block to ingest and make sure the cursor exists.
    async fn resolve_start_block(&self) -> Result<u64> {
        if let Some(cursor) = self.store.get_cursor(BATCH_SYNC_CURSOR).await? {
            let start = cursor + 1;
            info!(cursor, start, "Resuming from existing cursor");
            return Ok(start);
        }

        let start = if self.settings.start_block > 0 {
            self.settings.start_block
        } else {
            match self.locator.locate().await {
                Ok(block) => block,
                Err(AppError::ContractNotFound(address)) => {
                    warn!(address, "Contract code not found, using default start");
                    1
                }
                Err(err) => return Err(err),
            }
        };

        self.store
            .create_cursor(BATCH_SYNC_CURSOR, start.saturating_sub(1))
            .await?;
        info!(start, "Fresh start, cursor created");
        Ok(start)
    }

    /// Ingest one inclusive range: fetch logs, enrich with block timestamps,
    /// save, and advance the cursor. Returns the number of events saved.
    async fn ingest_range(&self, from: u64, to: u64) -> Result<usize> {
        let filter = LogFilter::transfers(self.contract, from, to);
        let logs = self.chain.get_logs(&filter).await.map_err(AppError::from)?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            let Some(block) = log.block_number else {
                debug!("Skipping log without block number");
                continue;
            };
            let timestamp = self.chain.block_timestamp(block).await.map_err(AppError::from)?;
            match TransferEvent::from_log(log, timestamp) {
                Ok(event) => events.push(event),
                // Other contracts' events cannot match the filter, but a
                // permissive upstream is not worth failing the range over.
                Err(DecodeError::NotTransfer) => {
                    debug!(block, "Skipping non-Transfer log");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let outcome = self.store.save_events(&events).await?;
        self.store.advance_cursor(BATCH_SYNC_CURSOR, to).await?;

        debug!(
            from,
            to,
            inserted = outcome.inserted,
            ignored = outcome.ignored,
            "Range durable, cursor advanced"
        );
        Ok(events.len())
    }
}

/// Whether a batch failure should trigger halving instead of a skip.
fn is_rate_limited(err: &AppError) -> bool {
    err.as_rpc().is_some_and(RpcError::is_rate_limit)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
