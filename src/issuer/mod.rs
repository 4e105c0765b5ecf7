//! Deposit address issuance
//!
//! Fresh source-chain addresses come from an external `KeyProvider`; the
//! issuer only checks that what comes back is a well-formed address on the
//! configured network.

mod http;

pub use http::HttpKeyProvider;

use crate::error::{BridgeError, BridgeResult};
use crate::swap::SwapId;

use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};
use std::sync::Arc;
use tracing::debug;

/// Source of fresh, never-reused deposit addresses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn issue_address(&self, swap_id: &SwapId) -> BridgeResult<String>;
}

pub struct DepositAddressIssuer {
    provider: Arc<dyn KeyProvider>,
    network: Network,
}

impl DepositAddressIssuer {
    pub fn new(provider: Arc<dyn KeyProvider>, network: Network) -> Self {
        Self { provider, network }
    }

    /// Request a deposit address bound to `swap_id`
    pub async fn issue_address(&self, swap_id: &SwapId) -> BridgeResult<String> {
        let raw = self
            .provider
            .issue_address(swap_id)
            .await
            .map_err(|e| match e {
                BridgeError::AddressIssuance(_) => e,
                other => BridgeError::AddressIssuance(other.to_string()),
            })?;

        let address = self.validate(&raw)?;
        debug!("Issued deposit address {} for swap {}", address, swap_id);
        Ok(address)
    }

    fn validate(&self, raw: &str) -> BridgeResult<String> {
        let unchecked: Address<NetworkUnchecked> = raw.trim().parse().map_err(|e| {
            BridgeError::AddressIssuance(format!("Malformed address {:?}: {}", raw, e))
        })?;

        let address = unchecked.require_network(self.network).map_err(|e| {
            BridgeError::AddressIssuance(format!(
                "Address {:?} is not valid on {}: {}",
                raw, self.network, e
            ))
        })?;

        Ok(address.to_string())
    }
}
