//! The indexed `Transfer` event record and its wire decoding.
//!
//! A raw `eth_getLogs` entry is decoded into a [`TransferEvent`] and enriched
//! with the block timestamp before persistence. All addresses and hashes are
//! normalized to lowercase hex at this boundary.

use alloy::primitives::{Address, B256, b256};
use alloy::rpc::types::Log;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::primitives::{EthAddress, TokenValue, TxHash};

/// `keccak256("Transfer(address,address,uint256)")`, the topic0 of every
/// ERC-20 Transfer log.
pub const TRANSFER_EVENT_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFER EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// A single indexed ERC-20 Transfer.
///
/// The primary key is `(transaction_hash, log_index)`: one transaction may
/// emit several Transfers. `value` travels as an exact decimal string end to
/// end; it is never narrowed to a machine integer or float.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    /// Hash of the transaction that emitted the log.
    pub transaction_hash: TxHash,
    /// Position of the log within its transaction.
    pub log_index: u64,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Block timestamp from the header.
    pub timestamp: DateTime<Utc>,
    /// Sender address, lowercased.
    pub from: EthAddress,
    /// Recipient address, lowercased.
    pub to: EthAddress,
    /// Transferred amount as an exact 256-bit integer.
    pub value: TokenValue,
    /// Server-side insertion time.
    pub indexed_at: DateTime<Utc>,
}

impl TransferEvent {
    /// Decode a raw log into a `TransferEvent`.
    ///
    /// The caller supplies the block timestamp (fetched separately from the
    /// block header, since logs do not carry it).
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the log is not a Transfer or is missing
    /// positional metadata.
    pub fn from_log(log: &Log, timestamp: DateTime<Utc>) -> Result<Self, DecodeError> {
        let topics = log.topics();

        match topics.first() {
            Some(topic) if *topic == TRANSFER_EVENT_TOPIC => {}
            _ => return Err(DecodeError::NotTransfer),
        }
        if topics.len() != 3 {
            return Err(DecodeError::BadTopicCount(topics.len()));
        }

        let tx_hash = log
            .transaction_hash
            .ok_or(DecodeError::MissingField("transaction_hash"))?;
        let log_index = log.log_index.ok_or(DecodeError::MissingField("log_index"))?;
        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingField("block_number"))?;

        let data = log.data().data.as_ref();
        if data.len() != 32 {
            return Err(DecodeError::BadDataLength(data.len()));
        }
        let value = alloy::primitives::U256::from_be_slice(data);

        Ok(Self {
            transaction_hash: TxHash::from(tx_hash),
            log_index,
            block_number,
            timestamp,
            from: EthAddress::from(Address::from_word(topics[1])),
            to: EthAddress::from(Address::from_word(topics[2])),
            value: TokenValue::new(value),
            indexed_at: Utc::now(),
        })
    }
}

/// Error decoding a raw log into a [`TransferEvent`].
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The log's topic0 is not the Transfer signature.
    #[error("log is not a Transfer event")]
    NotTransfer,
    /// A Transfer log carries exactly three topics.
    #[error("expected 3 topics, got {0}")]
    BadTopicCount(usize),
    /// The data segment must be a single 32-byte word.
    #[error("expected 32 data bytes, got {0}")]
    BadDataLength(usize),
    /// The log is missing positional metadata (pending logs are not indexed).
    #[error("log missing field: {0}")]
    MissingField(&'static str),
}

// ═══════════════════════════════════════════════════════════════════════════════
// QUERY TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Filter and pagination parameters for the event query surface.
#[derive(Debug, Clone)]
pub struct EventQuery {
    /// Match the sender address (normalized to lowercase before comparison).
    pub from: Option<EthAddress>,
    /// Match the recipient address.
    pub to: Option<EthAddress>,
    /// Inclusive lower block bound.
    pub start_block: Option<u64>,
    /// Inclusive upper block bound.
    pub end_block: Option<u64>,
    /// 1-based page number.
    pub page: u32,
    /// Rows per page.
    pub page_size: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            start_block: None,
            end_block: None,
            page: 1,
            page_size: 50,
        }
    }
}

impl EventQuery {
    /// Rows to skip: `(page - 1) * page_size`.
    #[must_use]
    pub const fn skip(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * (self.page_size as u64)
    }

    /// Rows to take.
    #[must_use]
    pub const fn take(&self) -> u64 {
        self.page_size as u64
    }
}

/// One page of query results plus the unpaginated match count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    /// Events ordered by `block_number DESC, log_index ASC`.
    pub events: Vec<TransferEvent>,
    /// Total rows matching the filter, ignoring pagination.
    pub total_count: u64,
}

/// Aggregate statistics over the indexed corpus.
///
/// `total_value_transferred` is an exact decimal-string sum; widening to a
/// float would silently lose precision on real token amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    /// Number of indexed events.
    pub total_events: u64,
    /// Exact decimal sum of all transferred values.
    pub total_value_transferred: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
