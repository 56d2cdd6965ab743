//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via a TOML file
//! or environment variables. The operational variables use their plain names
//! (`RPC_URL`, `CONTRACT_ADDRESS`, `START_BLOCK`, `DB_NAME`,
//! `INITIAL_BATCH_SIZE`), so a `.env` file or container environment works
//! without a prefix.

use std::time::Duration;

use alloy::primitives::Address;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::indexer::BackfillSettings;
use crate::rpc::GatewayConfig;
use crate::types::EthAddress;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Upstream JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Tracked contract address (lowercased internally).
    pub contract_address: String,
    /// First block to backfill; `0` triggers the creation-block search.
    pub start_block: u64,
    /// Path to the local SQLite database.
    pub db_name: String,
    /// Starting batch size for the backfill engine. Public rate-limited
    /// endpoints usually want something like 200 rather than the default.
    pub initial_batch_size: u64,

    /// Maximum concurrent upstream calls.
    pub max_concurrent_requests: usize,
    /// Retries per request on rate-limit signals.
    pub max_retries: u32,
    /// Base retry delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Cap on any single retry delay in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Random jitter added to retry delays, in milliseconds.
    pub retry_jitter_ms: u64,
    /// HTTP request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Batch size floor under rate-limit pressure.
    pub min_batch_size: u64,
    /// Base sleep after a rate-limited batch, in milliseconds.
    pub rate_limit_backoff_ms: u64,
    /// Cap on the rate-limit sleep, in milliseconds.
    pub rate_limit_backoff_cap_ms: u64,
    /// Base sleep when already at the batch floor, in milliseconds.
    pub floor_backoff_ms: u64,
    /// Cap on the floor sleep, in milliseconds.
    pub floor_backoff_cap_ms: u64,

    /// Live filter poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// API bind host.
    pub api_host: String,
    /// API bind port.
    pub api_port: u16,
    /// Sustained per-client request rate for the API throttle.
    pub api_rate_limit_per_second: u32,
    /// Burst allowance for the API throttle.
    pub api_rate_limit_burst: u32,

    /// Log level directive when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Settings {
    /// Load settings from defaults, an optional config file, and the
    /// environment (later sources override earlier ones).
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("rpc_url", "http://localhost:8545")?
            .set_default("contract_address", "")?
            .set_default("start_block", 0u64)?
            .set_default("db_name", "transfer-indexer.db")?
            .set_default("initial_batch_size", 1000u64)?
            .set_default("max_concurrent_requests", 5u64)?
            .set_default("max_retries", 5u64)?
            .set_default("retry_base_delay_ms", 1000u64)?
            .set_default("retry_max_delay_ms", 30_000u64)?
            .set_default("retry_jitter_ms", 1000u64)?
            .set_default("request_timeout_ms", 30_000u64)?
            .set_default("min_batch_size", 10u64)?
            .set_default("rate_limit_backoff_ms", 1000u64)?
            .set_default("rate_limit_backoff_cap_ms", 60_000u64)?
            .set_default("floor_backoff_ms", 5000u64)?
            .set_default("floor_backoff_cap_ms", 300_000u64)?
            .set_default("poll_interval_ms", 1000u64)?
            .set_default("api_host", "0.0.0.0")?
            .set_default("api_port", 8080u64)?
            .set_default("api_rate_limit_per_second", 100u64)?
            .set_default("api_rate_limit_burst", 200u64)?
            .set_default("log_level", "info")?
            // Load configuration file if present
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            // Override with environment variables (RPC_URL, DB_NAME, ...)
            .add_source(Environment::default().try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rpc_url.is_empty() {
            errors.push("rpc_url cannot be empty".into());
        }
        if self.contract_address.is_empty() {
            errors.push("contract_address must be set".into());
        } else if EthAddress::from_hex(&self.contract_address).is_err() {
            errors.push(format!(
                "contract_address is not a valid address: {}",
                self.contract_address
            ));
        }
        if self.db_name.is_empty() {
            errors.push("db_name cannot be empty".into());
        }
        if self.initial_batch_size == 0 {
            errors.push("initial_batch_size must be non-zero".into());
        }
        if self.min_batch_size == 0 {
            errors.push("min_batch_size must be non-zero".into());
        }
        if self.min_batch_size > self.initial_batch_size {
            errors.push("min_batch_size cannot exceed initial_batch_size".into());
        }
        if self.max_concurrent_requests == 0 {
            errors.push("max_concurrent_requests must be non-zero".into());
        }
        if self.api_port == 0 {
            errors.push("api_port must be non-zero".into());
        }
        if self.api_rate_limit_per_second == 0 {
            errors.push("api_rate_limit_per_second must be non-zero".into());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// The tracked contract, parsed and normalized.
    ///
    /// # Errors
    /// Returns an error if the configured address is invalid.
    pub fn contract(&self) -> Result<Address> {
        let address = EthAddress::from_hex(&self.contract_address)
            .map_err(|e| AppError::InvalidAddress(format!("{}: {e}", self.contract_address)))?;
        Ok(address.into())
    }

    /// Gateway scheduler configuration.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_concurrent: self.max_concurrent_requests,
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: Duration::from_millis(self.retry_jitter_ms),
            ..GatewayConfig::default()
        }
    }

    /// Backfill engine configuration.
    #[must_use]
    pub fn backfill_settings(&self) -> BackfillSettings {
        BackfillSettings {
            start_block: self.start_block,
            initial_batch_size: self.initial_batch_size,
            min_batch_size: self.min_batch_size,
            rate_limit_backoff: Duration::from_millis(self.rate_limit_backoff_ms),
            rate_limit_backoff_cap: Duration::from_millis(self.rate_limit_backoff_cap_ms),
            floor_backoff: Duration::from_millis(self.floor_backoff_ms),
            floor_backoff_cap: Duration::from_millis(self.floor_backoff_cap_ms),
            ..BackfillSettings::default()
        }
    }

    /// Get the HTTP request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the live poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> Settings {
        Settings {
            rpc_url: "http://localhost:8545".into(),
            contract_address: "0x1111111111111111111111111111111111111111".into(),
            start_block: 0,
            db_name: "test.db".into(),
            initial_batch_size: 1000,
            max_concurrent_requests: 5,
            max_retries: 5,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            retry_jitter_ms: 1000,
            request_timeout_ms: 30_000,
            min_batch_size: 10,
            rate_limit_backoff_ms: 1000,
            rate_limit_backoff_cap_ms: 60_000,
            floor_backoff_ms: 5000,
            floor_backoff_cap_ms: 300_000,
            poll_interval_ms: 1000,
            api_host: "127.0.0.1".into(),
            api_port: 8080,
            api_rate_limit_per_second: 100,
            api_rate_limit_burst: 200,
            log_level: "info".into(),
        }
    }

    #[test]
    fn valid_settings_pass_validation() {
        assert!(valid_settings().validate().is_ok());
    }

    #[test]
    fn missing_contract_address_fails_validation() {
        let mut settings = valid_settings();
        settings.contract_address = String::new();
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("contract_address")));
    }

    #[test]
    fn malformed_contract_address_fails_validation() {
        let mut settings = valid_settings();
        settings.contract_address = "0x1234".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn min_batch_above_initial_fails_validation() {
        let mut settings = valid_settings();
        settings.initial_batch_size = 5;
        let errors = settings.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("min_batch_size")));
    }

    #[test]
    fn contract_is_parsed_and_normalized() {
        let mut settings = valid_settings();
        settings.contract_address = "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01".into();
        let contract = settings.contract().unwrap();
        assert_eq!(
            EthAddress::from(contract).to_hex(),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
    }

    #[test]
    fn gateway_config_reflects_settings() {
        let config = valid_settings().gateway_config();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.base_delay, Duration::from_secs(1));
    }
}
