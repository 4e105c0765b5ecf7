//! Confirmation oracle - source-chain deposit status via an address indexer
//!
//! This module provides:
//! - The read-only `ConfirmationOracle` capability used by the engine
//! - An Esplora-compatible HTTP client with endpoint failover and bounded backoff

pub mod esplora;

pub use esplora::EsploraOracle;

use crate::error::BridgeResult;

use async_trait::async_trait;

/// A funding output currently sitting at the address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingOutput {
    pub value: u64,
    pub confirmations: u64,
}

/// Deposit status of one address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressStatus {
    /// Confirmed plus unconfirmed value ever received
    pub observed_amount: u64,
    /// Unspent funding outputs, confirmed or not
    pub outputs: Vec<FundingOutput>,
}

impl AddressStatus {
    pub fn has_activity(&self) -> bool {
        self.observed_amount > 0
    }

    /// Confirmations of the deposit that covers `required`.
    ///
    /// Outputs are taken best-confirmed first; the answer is the depth of the
    /// output at which the running total reaches `required`. Extra outputs
    /// beyond that point (late dust, say) do not lower it. When the outputs
    /// never cover `required` it is the depth of the least-confirmed output.
    pub fn confirmations_for(&self, required: u64) -> u64 {
        let mut outputs = self.outputs.clone();
        outputs.sort_by(|a, b| b.confirmations.cmp(&a.confirmations));

        let mut total = 0u64;
        for output in &outputs {
            total = total.saturating_add(output.value);
            if total >= required {
                return output.confirmations;
            }
        }
        outputs.last().map(|o| o.confirmations).unwrap_or(0)
    }
}

#[async_trait]
pub trait ConfirmationOracle: Send + Sync {
    /// Query deposit status. An address without activity yields a zeroed
    /// status; only a failed query is an error.
    async fn query_address(&self, address: &str) -> BridgeResult<AddressStatus>;
}
