//! In-memory swap registry

use super::{StateCounts, SwapRegistry};
use crate::error::{BridgeError, BridgeResult};
use crate::swap::{Swap, SwapId, SwapState, Transition};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Tables {
    swaps: HashMap<SwapId, Swap>,
    /// Deposit address -> owning swap, never released
    addresses: HashMap<String, SwapId>,
}

/// Registry backed by a single lock over both tables, so every write and
/// every count sees one consistent state
#[derive(Default)]
pub struct InMemorySwapRegistry {
    tables: RwLock<Tables>,
}

impl InMemorySwapRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapRegistry for InMemorySwapRegistry {
    async fn create(&self, swap: Swap) -> BridgeResult<()> {
        let mut tables = self.tables.write().await;

        if let Some(owner) = tables.addresses.get(&swap.source_deposit_address) {
            return Err(BridgeError::DuplicateAddress {
                address: swap.source_deposit_address.clone(),
                swap_id: *owner,
            });
        }
        if tables.swaps.contains_key(&swap.id) {
            return Err(BridgeError::Internal(format!(
                "Swap {} already exists",
                swap.id
            )));
        }

        tables
            .addresses
            .insert(swap.source_deposit_address.clone(), swap.id);
        debug!("Registered swap {} at {}", swap.id, swap.source_deposit_address);
        tables.swaps.insert(swap.id, swap);
        Ok(())
    }

    async fn get(&self, id: &SwapId) -> BridgeResult<Swap> {
        self.tables
            .read()
            .await
            .swaps
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::SwapNotFound {
                swap_id: id.to_string(),
            })
    }

    async fn update_state(
        &self,
        id: &SwapId,
        expected: SwapState,
        transition: Transition,
    ) -> BridgeResult<Swap> {
        let mut tables = self.tables.write().await;
        let swap = tables
            .swaps
            .get_mut(id)
            .ok_or_else(|| BridgeError::SwapNotFound {
                swap_id: id.to_string(),
            })?;

        // Apply to a copy so a rejected transition leaves the record untouched
        let mut updated = swap.clone();
        updated.apply(expected, &transition, Utc::now())?;
        *swap = updated.clone();
        Ok(updated)
    }

    async fn list_non_terminal(&self) -> BridgeResult<Vec<SwapId>> {
        let tables = self.tables.read().await;
        let mut active: Vec<_> = tables
            .swaps
            .values()
            .filter(|s| !s.state.is_terminal())
            .map(|s| (s.created_at, s.id))
            .collect();
        active.sort();
        Ok(active.into_iter().map(|(_, id)| id).collect())
    }

    async fn state_counts(&self) -> BridgeResult<StateCounts> {
        let tables = self.tables.read().await;
        let mut counts = StateCounts::new();
        for swap in tables.swaps.values() {
            *counts.entry(swap.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
