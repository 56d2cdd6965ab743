//! Ports: the traits at the seams of the ingestion pipeline.
//!
//! - [`store`] - Event persistence and sync cursors
//! - [`sink`] - Live event delivery

pub mod sink;
pub mod store;

pub use sink::EventSink;
pub use store::{BATCH_SYNC_CURSOR, EventStore, REALTIME_SYNC_CURSOR, SaveOutcome};
