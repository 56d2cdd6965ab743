//! Upstream JSON-RPC access.
//!
//! All chain reads flow through one [`RpcGateway`]: a mailbox-driven pump
//! that enforces the in-flight cap, the global throttle gate, and per-request
//! retry. [`ChainClient`] layers typed `eth_*` helpers on top;
//! [`RpcTransport`] is the raw HTTP executor underneath.

mod chain;
mod gateway;
mod transport;

pub use chain::{ChainClient, LogFilter, parse_quantity, to_quantity};
pub use gateway::{GatewayConfig, GatewayMetrics, RateLimitPredicate, RpcGateway};
pub use transport::RpcTransport;
