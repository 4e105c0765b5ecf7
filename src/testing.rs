//! In-process doubles for the bridge capabilities, shared by unit tests

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::issuer::KeyProvider;
use crate::ledger::DestinationLedger;
use crate::oracle::{AddressStatus, ConfirmationOracle, FundingOutput};
use crate::swap::SwapId;

use async_trait::async_trait;
use bitcoin::{Address, Network, ScriptBuf};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic, distinct regtest address for `n`
pub fn regtest_address(n: u64) -> String {
    let script = ScriptBuf::from(n.to_le_bytes().to_vec());
    Address::p2wsh(&script, Network::Regtest).to_string()
}

pub fn test_bridge_config() -> BridgeConfig {
    BridgeConfig {
        instance_id: "bridge-test".to_string(),
        poll_interval_ms: 10,
        confirmation_threshold: 3,
        swap_ttl_secs: 60,
        max_concurrent_evaluations: 4,
        oracle_timeout_ms: 1_000,
        oracle_unavailable_after_secs: 30,
        finalization_timeout_ms: 1_000,
        finalization_max_retries: 3,
        finalization_retry_delay_ms: 1,
        health_check_interval_secs: 30,
    }
}

/// Hands out a fresh regtest address per call
#[derive(Default)]
pub struct SequentialKeyProvider {
    next: AtomicU64,
}

#[async_trait]
impl KeyProvider for SequentialKeyProvider {
    async fn issue_address(&self, _swap_id: &SwapId) -> BridgeResult<String> {
        Ok(regtest_address(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Oracle answering from a script; unknown addresses have no activity
#[derive(Default)]
pub struct ScriptedOracle {
    /// `None` makes the query fail
    statuses: Mutex<HashMap<String, Option<AddressStatus>>>,
}

impl ScriptedOracle {
    /// One unspent output holding the whole amount
    pub fn set(&self, address: &str, observed_amount: u64, confirmations: u64) {
        self.set_outputs(address, &[(observed_amount, confirmations)]);
    }

    /// Unspent outputs as `(value, confirmations)` pairs
    pub fn set_outputs(&self, address: &str, outputs: &[(u64, u64)]) {
        let status = AddressStatus {
            observed_amount: outputs.iter().map(|(value, _)| value).sum(),
            outputs: outputs
                .iter()
                .map(|&(value, confirmations)| FundingOutput {
                    value,
                    confirmations,
                })
                .collect(),
        };
        self.statuses
            .lock()
            .unwrap()
            .insert(address.to_string(), Some(status));
    }

    pub fn fail(&self, address: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(address.to_string(), None);
    }
}

#[async_trait]
impl ConfirmationOracle for ScriptedOracle {
    async fn query_address(&self, address: &str) -> BridgeResult<AddressStatus> {
        match self.statuses.lock().unwrap().get(address) {
            Some(Some(status)) => Ok(status.clone()),
            Some(None) => Err(BridgeError::OracleQuery {
                address: address.to_string(),
                message: "connection refused".to_string(),
            }),
            None => Ok(AddressStatus::default()),
        }
    }
}

/// Idempotent ledger that counts calls and can fail or stall on demand
#[derive(Default)]
pub struct CountingLedger {
    calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
    credited: DashMap<SwapId, (String, u64)>,
}

impl CountingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing(times: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn distinct_credits(&self) -> usize {
        self.credited.len()
    }

    pub fn credited_amount(&self, swap_id: &SwapId) -> Option<u64> {
        self.credited.get(swap_id).map(|entry| entry.1)
    }
}

#[async_trait]
impl DestinationLedger for CountingLedger {
    async fn credit(&self, recipient: &str, amount: u64, swap_id: &SwapId) -> BridgeResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BridgeError::Ledger(format!("rpc unavailable for {}", recipient)));
        }

        let entry = self
            .credited
            .entry(*swap_id)
            .or_insert_with(|| (format!("0x{}", swap_id.as_uuid().simple()), amount));
        Ok(entry.0.clone())
    }
}
