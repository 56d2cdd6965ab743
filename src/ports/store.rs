//! Storage port for event persistence and sync cursors.
//!
//! The ingestion pipeline only ever talks to this trait; infrastructure
//! adapters implement it with a concrete relational backend.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EventPage, EventQuery, TransferEvent, TransferStats};

/// Cursor advanced by the backfill engine.
pub const BATCH_SYNC_CURSOR: &str = "batch-sync";

/// Cursor advanced by the live tailer.
pub const REALTIME_SYNC_CURSOR: &str = "realtime-sync";

/// Outcome of a batched save: how many rows were new vs. already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveOutcome {
    /// Rows inserted.
    pub inserted: u64,
    /// Rows ignored on primary-key conflict.
    pub ignored: u64,
}

/// Port for event persistence and cursor management.
///
/// # Contract
///
/// - `save_events` is idempotent on `(transaction_hash, log_index)`:
///   re-saving an already-present row is a no-op, never an error.
/// - `advance_cursor` is monotonic per cursor id: an update that would lower
///   `last_synced_block` must be a no-op, and the condition must be evaluated
///   atomically in the store so concurrent writers cannot regress it.
/// - Callers advance a cursor to block `B` only after every event they hold
///   for `(prev, B]` has been durably saved.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a batch of events in a single durable unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. Key conflicts are
    /// not errors; they count as `ignored`.
    async fn save_events(&self, events: &[TransferEvent]) -> Result<SaveOutcome>;

    /// Read a cursor's `last_synced_block`, or `None` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_cursor(&self, id: &str) -> Result<Option<u64>>;

    /// Create a cursor row if absent.
    ///
    /// If a concurrent create wins, the stored value is re-read; the
    /// returned block is whatever is durably in place afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_cursor(&self, id: &str, block: u64) -> Result<u64>;

    /// Advance a cursor iff `block` strictly exceeds the stored value.
    ///
    /// Lower-or-equal values are silently ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn advance_cursor(&self, id: &str, block: u64) -> Result<()>;

    /// Query the indexed corpus for the API surface.
    ///
    /// Results are ordered `block_number DESC, log_index ASC` and paginated
    /// via the query's `page`/`page_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_events(&self, query: &EventQuery) -> Result<EventPage>;

    /// Aggregate statistics: event count plus the exact decimal sum of all
    /// transferred values.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    async fn get_stats(&self) -> Result<TransferStats>;
}
