//! Domain types for the transfer indexer.
//!
//! - [`primitives`] - Validated newtypes (addresses, hashes, token values)
//! - [`events`] - The indexed `TransferEvent` record and query types

pub mod events;
pub mod primitives;

pub use events::{EventPage, EventQuery, TRANSFER_EVENT_TOPIC, TransferEvent, TransferStats};
pub use primitives::{EthAddress, TokenValue, TxHash};
