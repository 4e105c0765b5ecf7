//! Destination ledger - credits recipients on the EVM side
//!
//! `credit` must be idempotent per swap id: calling it again for a swap that
//! was already credited returns the original reference instead of minting twice.

mod evm;

pub use evm::EvmLedger;

use crate::error::{BridgeError, BridgeResult};
use crate::swap::SwapId;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use sha3::{Digest, Keccak256};
use std::str::FromStr;

/// Wei per satoshi: 18 EVM decimals against 8 bitcoin decimals
const WEI_PER_SAT: u64 = 10_000_000_000;

#[async_trait]
pub trait DestinationLedger: Send + Sync {
    /// Credit `amount` satoshis worth to `recipient`, returning the
    /// destination-chain reference of the credit.
    async fn credit(&self, recipient: &str, amount: u64, swap_id: &SwapId) -> BridgeResult<String>;
}

/// Parse and checksum a destination recipient
pub fn parse_recipient(recipient: &str) -> BridgeResult<String> {
    let trimmed = recipient.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 42 {
        return Err(BridgeError::InvalidRequest(format!(
            "Invalid destination recipient: {:?}",
            recipient
        )));
    }

    let address = Address::from_str(trimmed).map_err(|e| {
        BridgeError::InvalidRequest(format!("Invalid destination recipient {:?}: {}", recipient, e))
    })?;
    if address.is_zero() {
        return Err(BridgeError::InvalidRequest(
            "Destination recipient cannot be the zero address".to_string(),
        ));
    }

    Ok(to_checksum(&address, None))
}

pub fn sats_to_wei(sats: u64) -> U256 {
    U256::from(sats) * U256::from(WEI_PER_SAT)
}

/// 32-byte key the bridge contract uses to deduplicate credits
pub fn swap_key(swap_id: &SwapId) -> [u8; 32] {
    Keccak256::digest(swap_id.as_uuid().as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipient_checksums() {
        let parsed = parse_recipient("0x5fbdb2315678afecb367f032d93f642f64180aa3").unwrap();
        assert_eq!(parsed, "0x5FbDB2315678afecb367f032d93F642f64180aa3");
    }

    #[test]
    fn test_parse_recipient_rejects_garbage() {
        assert!(parse_recipient("bcrt1qxyz").is_err());
        assert!(parse_recipient("0x1234").is_err());
        assert!(parse_recipient("0xzz00000000000000000000000000000000000000").is_err());
        assert!(parse_recipient("0x0000000000000000000000000000000000000000").is_err());
    }

    #[test]
    fn test_sats_to_wei() {
        assert_eq!(sats_to_wei(1), U256::from(WEI_PER_SAT));
        assert_eq!(
            sats_to_wei(100_000_000),
            U256::from(10u64).pow(U256::from(18u64))
        );
    }

    #[test]
    fn test_swap_key_is_stable() {
        let id = SwapId::new();
        assert_eq!(swap_key(&id), swap_key(&id));
        assert_ne!(swap_key(&id), swap_key(&SwapId::new()));
    }
}
