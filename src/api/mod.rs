//! HTTP query surface and live push channel.
//!
//! The ingestion pipeline treats this layer as a downstream consumer: it
//! reads through the store port and receives live events via the broadcast
//! channel fed by the tailer's sink.

mod rate_limit;
mod routes;
mod ws;

pub use rate_limit::IpRateLimiter;
pub use routes::{AppState, router};
pub use ws::{BroadcastSink, EVENT_CHANNEL_CAPACITY};
