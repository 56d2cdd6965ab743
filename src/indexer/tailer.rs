//! Live tailer: follows the chain tip for new Transfer events.
//!
//! Installs an upstream log filter for the contract's Transfer topic and
//! polls it through the gateway. Each event is normalized, persisted, and
//! pushed to a pluggable sink. The `realtime-sync` cursor advances
//! monotonically, so out-of-order arrivals are harmless, and the
//! `(transaction_hash, log_index)` primary key collapses any overlap with
//! the backfill path.
//!
//! Per-event failures are logged and the event dropped; the subscription
//! itself survives everything short of shutdown. An expired upstream filter
//! is transparently reinstalled.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, Result};
use crate::ports::sink::EventSink;
use crate::ports::store::{EventStore, REALTIME_SYNC_CURSOR};
use crate::rpc::{ChainClient, LogFilter};
use crate::types::TransferEvent;
use crate::types::events::DecodeError;

/// Default interval between filter polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ═══════════════════════════════════════════════════════════════════════════════
// LIVE TAILER
// ═══════════════════════════════════════════════════════════════════════════════

/// Tip-following ingestion for one tracked contract.
///
/// # Type Parameters
///
/// * `S` - Store implementation providing [`EventStore`]
#[derive(Debug)]
pub struct LiveTailer<S> {
    chain: Arc<ChainClient>,
    store: Arc<S>,
    contract: Address,
    poll_interval: Duration,
}

impl<S> LiveTailer<S>
where
    S: EventStore,
{
    /// Create a new tailer.
    pub const fn new(chain: Arc<ChainClient>, store: Arc<S>, contract: Address) -> Self {
        Self {
            chain,
            store,
            contract,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Subscribe and run until shutdown.
    ///
    /// Produces each normalized event to `sink` after persisting it.
    /// Delivery failures are the sink's concern: they are logged here and
    /// never raised to the upstream.
    ///
    /// # Errors
    ///
    /// Returns an error only if the initial filter installation fails;
    /// everything after that is logged and survived.
    #[instrument(skip(self, sink, shutdown), fields(contract = %self.contract))]
    pub async fn subscribe(
        &self,
        sink: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let filter = LogFilter::transfers_at_tip(self.contract);
        let mut filter_id = self
            .chain
            .new_filter(&filter)
            .await
            .map_err(AppError::from)?;
        info!(filter_id, "Live subscription installed");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Live tailer shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let logs = match self.chain.filter_changes(&filter_id).await {
                Ok(logs) => logs,
                Err(err) => {
                    // Nodes expire idle filters; reinstall and carry on.
                    warn!(error = %err, "Filter poll failed, reinstalling");
                    match self.chain.new_filter(&filter).await {
                        Ok(id) => filter_id = id,
                        Err(err) => warn!(error = %err, "Filter reinstall failed"),
                    }
                    continue;
                }
            };

            for log in &logs {
                if let Err(err) = self.process_log(log, sink.as_ref()).await {
                    warn!(error = %err, "Dropped live event");
                }
            }
        }
    }

    /// Normalize, persist, advance the realtime cursor, and hand off.
    async fn process_log(&self, log: &Log, sink: &dyn EventSink) -> Result<()> {
        let block = log
            .block_number
            .ok_or_else(|| AppError::from(DecodeError::MissingField("block_number")))?;
        let timestamp = self
            .chain
            .block_timestamp(block)
            .await
            .map_err(AppError::from)?;
        let event = TransferEvent::from_log(log, timestamp)?;

        self.store.save_events(std::slice::from_ref(&event)).await?;
        self.store.advance_cursor(REALTIME_SYNC_CURSOR, block).await?;

        debug!(
            block,
            tx = %event.transaction_hash,
            log_index = event.log_index,
            "Live event ingested"
        );

        if let Err(err) = sink.deliver(&event).await {
            warn!(error = %err, "Sink delivery failed");
        }
        Ok(())
    }
}
