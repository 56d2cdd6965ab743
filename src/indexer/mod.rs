//! The ingestion pipeline.
//!
//! Three cooperating pieces, all reading the chain through the gateway and
//! writing through the store port:
//!
//! - [`CreationBlockLocator`] - seeds the initial cursor when no start block
//!   is configured
//! - [`BackfillEngine`] - sweeps history to the head captured at startup
//! - [`LiveTailer`] - follows the tip from the moment of subscription
//!
//! The two writers touch distinct cursors (`batch-sync`, `realtime-sync`)
//! and rely on the store's atomic conditional upsert for monotonicity; they
//! interleave freely.

mod backfill;
mod locator;
mod tailer;

pub use backfill::{BackfillEngine, BackfillSettings};
pub use locator::CreationBlockLocator;
pub use tailer::{DEFAULT_POLL_INTERVAL, LiveTailer};
