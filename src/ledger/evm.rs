//! Bridge contract client on the destination EVM chain

use super::{sats_to_wei, swap_key, DestinationLedger};
use crate::config::LedgerConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::swap::SwapId;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::id;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const MINT_SIGNATURE: &str = "mint(address,uint256,bytes32)";
const IS_PROCESSED_SIGNATURE: &str = "isProcessed(bytes32)";

type LedgerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Mints the wrapped asset through the bridge contract.
///
/// The contract rejects a second mint for the same swap key; the local
/// cache and the `isProcessed` probe keep retries from even attempting one.
pub struct EvmLedger {
    client: LedgerClient,
    contract: Address,
    confirmations: usize,
    /// swap id -> finalization reference of a confirmed credit
    credited: DashMap<SwapId, String>,
}

impl EvmLedger {
    pub async fn new(config: &LedgerConfig) -> BridgeResult<Self> {
        let wallet = Self::load_wallet(&config.private_key_env)?.with_chain_id(config.chain_id);

        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| BridgeError::Config(format!("Invalid ledger RPC URL: {}", e)))?
            .interval(Duration::from_millis(500));

        let contract = Address::from_str(&config.contract_address)
            .map_err(|e| BridgeError::Config(format!("Invalid contract address: {}", e)))?;

        info!(
            "Destination ledger on chain {} via contract {:?}, signer {:?}",
            config.chain_id,
            contract,
            wallet.address()
        );

        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
            contract,
            confirmations: config.confirmations,
            credited: DashMap::new(),
        })
    }

    /// Load the signing key from the configured environment variable
    fn load_wallet(env_var: &str) -> BridgeResult<LocalWallet> {
        let key = std::env::var(env_var).map_err(|_| {
            BridgeError::Config(format!("Ledger signing key not set: export {}", env_var))
        })?;

        key.parse::<LocalWallet>()
            .map_err(|e| BridgeError::Config(format!("Invalid ledger private key: {}", e)))
    }

    async fn is_processed(&self, key: [u8; 32]) -> BridgeResult<bool> {
        let mut data = id(IS_PROCESSED_SIGNATURE).to_vec();
        data.extend(abi::encode(&[Token::FixedBytes(key.to_vec())]));

        let call: TypedTransaction = TransactionRequest::new()
            .to(self.contract)
            .data(data)
            .into();

        let output = self
            .client
            .call(&call, None)
            .await
            .map_err(|e| BridgeError::Ledger(format!("isProcessed call failed: {}", e)))?;

        let decoded = abi::decode(&[ParamType::Bool], &output)
            .map_err(|e| BridgeError::Ledger(format!("Malformed isProcessed result: {}", e)))?;

        Ok(matches!(decoded.first(), Some(Token::Bool(true))))
    }

    fn mint_calldata(recipient: Address, amount: u64, key: [u8; 32]) -> Vec<u8> {
        let mut data = id(MINT_SIGNATURE).to_vec();
        data.extend(abi::encode(&[
            Token::Address(recipient),
            Token::Uint(sats_to_wei(amount)),
            Token::FixedBytes(key.to_vec()),
        ]));
        data
    }
}

#[async_trait]
impl DestinationLedger for EvmLedger {
    async fn credit(&self, recipient: &str, amount: u64, swap_id: &SwapId) -> BridgeResult<String> {
        if let Some(reference) = self.credited.get(swap_id) {
            debug!("Swap {} already credited in {}", swap_id, reference.value());
            return Ok(reference.value().clone());
        }

        let key = swap_key(swap_id);
        if self.is_processed(key).await? {
            // Credited by an earlier attempt whose receipt we never saw
            let reference = format!("0x{}", hex::encode(key));
            warn!(
                "Swap {} already processed on-chain, recording key {} as reference",
                swap_id, reference
            );
            self.credited.insert(*swap_id, reference.clone());
            return Ok(reference);
        }

        let recipient = Address::from_str(recipient)
            .map_err(|e| BridgeError::Ledger(format!("Invalid recipient {}: {}", recipient, e)))?;

        let tx = TransactionRequest::new()
            .to(self.contract)
            .data(Self::mint_calldata(recipient, amount, key));

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| BridgeError::Ledger(format!("Mint submission failed: {}", e)))?;
        let tx_hash = pending.tx_hash();
        debug!("Mint for swap {} submitted: {:?}", swap_id, tx_hash);

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .map_err(|e| BridgeError::Ledger(format!("Mint {:?} not confirmed: {}", tx_hash, e)))?
            .ok_or_else(|| BridgeError::Ledger(format!("Mint {:?} dropped", tx_hash)))?;

        if receipt.status != Some(1.into()) {
            return Err(BridgeError::Ledger(format!("Mint {:?} reverted", tx_hash)));
        }

        let reference = format!("{:?}", receipt.transaction_hash);
        self.credited.insert(*swap_id, reference.clone());
        info!("Swap {} credited to {:?} in {}", swap_id, recipient, reference);
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_calldata_layout() {
        let recipient = Address::from_low_u64_be(0xbeef);
        let key = [7u8; 32];
        let data = EvmLedger::mint_calldata(recipient, 100_000, key);

        assert_eq!(&data[..4], &id(MINT_SIGNATURE));
        assert_eq!(data.len(), 4 + 3 * 32);
        assert_eq!(&data[4 + 12..4 + 32], recipient.as_bytes());
        assert_eq!(U256::from_big_endian(&data[36..68]), sats_to_wei(100_000));
        assert_eq!(&data[68..100], &key);
    }
}
