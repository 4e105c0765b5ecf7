//! Configuration management for the bridge
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bridge: BridgeConfig,
    pub oracle: OracleConfig,
    pub key_provider: KeyProviderConfig,
    pub ledger: LedgerConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub instance_id: String,
    pub poll_interval_ms: u64,
    pub confirmation_threshold: u64,
    pub swap_ttl_secs: u64,
    pub max_concurrent_evaluations: usize,
    pub oracle_timeout_ms: u64,
    /// How long an address may stay unqueryable before its swap fails
    pub oracle_unavailable_after_secs: u64,
    pub finalization_timeout_ms: u64,
    pub finalization_max_retries: u32,
    pub finalization_retry_delay_ms: u64,
    pub health_check_interval_secs: u64,
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn swap_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.swap_ttl_secs as i64)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn oracle_unavailable_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.oracle_unavailable_after_secs as i64)
    }

    pub fn finalization_timeout(&self) -> Duration {
        Duration::from_millis(self.finalization_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Indexer endpoints, tried in order on failure
    pub base_urls: Vec<String>,
    pub request_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl OracleConfig {
    /// Indexer requests per query: address stats, unspent outputs, tip height
    const REQUESTS_PER_ATTEMPT: u64 = 3;

    /// Worst-case time for one query with every attempt timing out
    pub fn retry_budget_ms(&self) -> u64 {
        let attempts = self.max_attempts.max(1);
        let requests = u64::from(attempts)
            .saturating_mul(Self::REQUESTS_PER_ATTEMPT)
            .saturating_mul(self.request_timeout_ms);
        // Doubling sleeps between attempts: base * (2^(attempts - 1) - 1)
        let backoff = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempts - 1) - 1);
        requests.saturating_add(backoff)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyProviderConfig {
    pub url: String,
    pub network: bitcoin::Network,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub private_key_env: String,
    pub confirmations: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from the file named by `BRIDGE_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let bridge = &self.bridge;
        if bridge.confirmation_threshold == 0 {
            anyhow::bail!("bridge.confirmation_threshold must be at least 1");
        }
        if bridge.swap_ttl_secs == 0 {
            anyhow::bail!("bridge.swap_ttl_secs must be positive");
        }
        if bridge.max_concurrent_evaluations == 0 {
            anyhow::bail!("bridge.max_concurrent_evaluations must be positive");
        }
        if bridge.finalization_max_retries == 0 {
            anyhow::bail!("bridge.finalization_max_retries must be at least 1");
        }
        if self.oracle.base_urls.is_empty() {
            anyhow::bail!("oracle.base_urls must list at least one indexer");
        }
        if self.oracle.max_attempts == 0 {
            anyhow::bail!("oracle.max_attempts must be at least 1");
        }
        if bridge.oracle_timeout_ms < self.oracle.retry_budget_ms() {
            anyhow::bail!(
                "bridge.oracle_timeout_ms ({}) is shorter than the oracle retry budget ({}ms)",
                bridge.oracle_timeout_ms,
                self.oracle.retry_budget_ms()
            );
        }
        if self.database.is_none() {
            tracing::warn!("No [database] section - swaps are kept in memory only");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
