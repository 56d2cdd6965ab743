//! Creation-block locator.
//!
//! Seeds the initial backfill cursor when no start block is configured: a
//! binary search over the contract address's historical transaction count
//! finds the earliest block where it becomes nonzero. One probe is one
//! gateway call, so the search costs `O(log head)` upstream requests.
//!
//! The locator is deliberately forgiving: apart from the explicit
//! no-code-at-address preflight it never fails. If the search cannot
//! pinpoint the creation block it returns the configured start block when
//! positive, else 1.

use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, Result};
use crate::rpc::ChainClient;

/// One-shot binary search for the contract's first interesting block.
///
/// The result is cached in-process once determined.
#[derive(Debug)]
pub struct CreationBlockLocator {
    chain: Arc<ChainClient>,
    contract: Address,
    /// Lower search bound. Zero for mainnet; well-known testnets may use a
    /// higher floor to avoid wasted probes.
    floor: u64,
    /// Returned when the search cannot pinpoint the creation block.
    fallback_start: u64,
    located: OnceCell<u64>,
}

impl CreationBlockLocator {
    /// Create a locator for `contract`.
    #[must_use]
    pub const fn new(chain: Arc<ChainClient>, contract: Address, fallback_start: u64) -> Self {
        Self {
            chain,
            contract,
            floor: 0,
            fallback_start,
            located: OnceCell::const_new(),
        }
    }

    /// Raise the lower search bound.
    #[must_use]
    pub const fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    /// Find the smallest block at which the contract's transaction count is
    /// nonzero. Cached after the first call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ContractNotFound`] when the address carries no
    /// code at the current head. Every other condition resolves to a
    /// best-effort block number.
    pub async fn locate(&self) -> Result<u64> {
        self.located
            .get_or_try_init(|| self.search())
            .await
            .copied()
    }

    #[instrument(skip(self), fields(contract = %self.contract))]
    async fn search(&self) -> Result<u64> {
        let head = match self.chain.block_number().await {
            Ok(head) => head,
            Err(err) => {
                warn!(error = %err, "Could not read head, using fallback start");
                return Ok(self.fallback());
            }
        };

        match self.chain.get_code(self.contract).await {
            Ok(code) if is_empty_code(&code) => {
                return Err(AppError::ContractNotFound(self.contract.to_string()));
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "Code preflight failed, using fallback start");
                return Ok(self.fallback());
            }
        }

        let mut lo = self.floor;
        let mut hi = head;
        let mut probes = 0u32;

        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            probes += 1;

            let count = match self.chain.transaction_count(self.contract, mid).await {
                Ok(count) => count,
                Err(err) => {
                    warn!(block = mid, error = %err, "Probe failed, using fallback start");
                    return Ok(self.fallback());
                }
            };

            if count == 0 {
                lo = mid + 1;
                continue;
            }

            // Nonzero at mid: creation is at mid iff the previous block was
            // still zero.
            let prev_count = if mid == 0 {
                0
            } else {
                match self.chain.transaction_count(self.contract, mid - 1).await {
                    Ok(count) => count,
                    Err(err) => {
                        warn!(block = mid - 1, error = %err, "Probe failed, using fallback start");
                        return Ok(self.fallback());
                    }
                }
            };
            probes += 1;

            if prev_count == 0 {
                info!(block = mid, probes, "Located contract creation block");
                return Ok(mid);
            }

            if mid == 0 {
                break;
            }
            hi = mid - 1;
        }

        debug!(probes, "Search exhausted without pinpointing creation");
        Ok(self.fallback())
    }

    const fn fallback(&self) -> u64 {
        if self.fallback_start > 0 {
            self.fallback_start
        } else {
            1
        }
    }
}

/// `eth_getCode` returns `0x` for addresses without deployed code.
fn is_empty_code(code: &str) -> bool {
    matches!(code, "" | "0x")
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
