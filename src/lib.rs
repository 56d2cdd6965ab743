//! ERC-20 Transfer Indexer
//!
//! Ingests `Transfer` logs for a single tracked contract from an
//! Ethereum-compatible node, persists them to a local SQLite store, and
//! exposes the corpus through a query API plus a live WebSocket channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        INGESTION PIPELINE                        │
//! │                                                                  │
//! │  ┌──────────┐   ┌─────────────┐      ┌──────────────┐            │
//! │  │ Locator  │──▶│  Backfill   │─────▶│              │            │
//! │  └──────────┘   │  Engine     │      │  EventStore  │──▶ SQLite  │
//! │       │         └─────────────┘      │   (port)     │            │
//! │       ▼                ▲             │              │            │
//! │  ┌──────────────────┐  │             └──────▲───────┘            │
//! │  │   RPC Gateway    │◀─┤                    │                    │
//! │  │ (queue/throttle) │  │             ┌──────┴───────┐   ┌─────┐  │
//! │  └──────────────────┘  └─────────────│  Live Tailer │──▶│Sink │  │
//! │                                      └──────────────┘   └─────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every upstream call flows through the gateway, which owns the in-flight
//! cap, the global throttle gate, and rate-limit retries. The backfill
//! engine and live tailer write through the same store port but advance
//! independent cursors (`batch-sync`, `realtime-sync`).
//!
//! # Modules
//!
//! - [`types`] - Domain types (events, validated primitives)
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`rpc`] - Gateway, transport, and typed chain helpers
//! - [`indexer`] - Locator, backfill engine, live tailer
//! - [`ports`] - Store and sink traits
//! - [`store`] - SQLite persistence adapter
//! - [`api`] - REST and WebSocket API

pub mod api;
pub mod config;
pub mod error;
pub mod indexer;
pub mod ports;
pub mod rpc;
pub mod store;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}
