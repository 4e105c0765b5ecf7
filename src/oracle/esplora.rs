//! Esplora-compatible indexer client with multi-endpoint failover

use super::{AddressStatus, ConfirmationOracle, FundingOutput};
use crate::config::OracleConfig;
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct TxoStats {
    funded_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct AddressStats {
    chain_stats: TxoStats,
    #[serde(default)]
    mempool_stats: TxoStats,
}

#[derive(Debug, Deserialize)]
struct UtxoStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Utxo {
    value: u64,
    status: UtxoStatus,
}

/// Oracle backed by one or more Esplora-style REST endpoints
pub struct EsploraOracle {
    config: OracleConfig,
    client: reqwest::Client,
    /// Current active endpoint index
    current_endpoint: AtomicUsize,
}

impl EsploraOracle {
    pub fn new(config: OracleConfig) -> BridgeResult<Self> {
        if config.base_urls.is_empty() {
            return Err(BridgeError::Config("No indexer endpoints configured".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            current_endpoint: AtomicUsize::new(0),
        })
    }

    fn endpoint(&self) -> &str {
        let idx = self.current_endpoint.load(Ordering::Relaxed);
        self.config.base_urls[idx % self.config.base_urls.len()].trim_end_matches('/')
    }

    /// Switch to next available endpoint
    fn failover(&self) {
        if self.config.base_urls.len() < 2 {
            return;
        }
        let current = self.current_endpoint.load(Ordering::Relaxed);
        let next = (current + 1) % self.config.base_urls.len();
        self.current_endpoint.store(next, Ordering::Relaxed);
        warn!("Indexer failover to endpoint {}", next);
    }

    async fn fetch_status(&self, address: &str) -> BridgeResult<AddressStatus> {
        let base = self.endpoint();

        let stats: AddressStats = self
            .get_json(address, &format!("{}/address/{}", base, address))
            .await?;
        let utxos: Vec<Utxo> = self
            .get_json(address, &format!("{}/address/{}/utxo", base, address))
            .await?;

        // Tip height only matters once something is confirmed
        let tip_height = if utxos.iter().any(|u| u.status.confirmed) {
            self.get_tip_height(address, base).await?
        } else {
            0
        };

        Ok(summarize(&stats, &utxos, tip_height))
    }

    async fn get_json<T: DeserializeOwned>(&self, address: &str, url: &str) -> BridgeResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| query_error(address, e))?;

        response.json::<T>().await.map_err(|e| query_error(address, e))
    }

    async fn get_tip_height(&self, address: &str, base: &str) -> BridgeResult<u64> {
        let body = self
            .client
            .get(format!("{}/blocks/tip/height", base))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| query_error(address, e))?
            .text()
            .await
            .map_err(|e| query_error(address, e))?;

        body.trim().parse().map_err(|_| BridgeError::OracleQuery {
            address: address.to_string(),
            message: format!("Malformed tip height: {:?}", body),
        })
    }
}

#[async_trait]
impl ConfirmationOracle for EsploraOracle {
    async fn query_address(&self, address: &str) -> BridgeResult<AddressStatus> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = Duration::from_millis(self.config.backoff_base_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_status(address).await {
                Ok(status) => {
                    debug!(
                        "Address {}: {} sats across {} unspent outputs",
                        address,
                        status.observed_amount,
                        status.outputs.len()
                    );
                    return Ok(status);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Indexer query for {} failed (attempt {}/{}): {}",
                        address, attempt, max_attempts, e
                    );
                    self.failover();
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn query_error(address: &str, err: reqwest::Error) -> BridgeError {
    BridgeError::OracleQuery {
        address: address.to_string(),
        message: err.to_string(),
    }
}

fn summarize(stats: &AddressStats, utxos: &[Utxo], tip_height: u64) -> AddressStatus {
    let outputs = utxos
        .iter()
        .map(|utxo| FundingOutput {
            value: utxo.value,
            confirmations: confirmations(&utxo.status, tip_height),
        })
        .collect();

    AddressStatus {
        observed_amount: stats.chain_stats.funded_txo_sum + stats.mempool_stats.funded_txo_sum,
        outputs,
    }
}

fn confirmations(status: &UtxoStatus, tip_height: u64) -> u64 {
    match (status.confirmed, status.block_height) {
        (false, _) => 0,
        (true, Some(height)) => tip_height.saturating_sub(height) + 1,
        (true, None) => 1,
    }
}
