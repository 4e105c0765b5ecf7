//! Swap registry - single source of truth for swap state
//!
//! Handles:
//! - Swap record creation with 1:1 deposit address binding
//! - Compare-and-set state updates guarded by the expected prior state
//! - Active (non-terminal) swap enumeration for the monitor
//! - Point-in-time state counts for status reporting

mod memory;
mod postgres;

pub use memory::InMemorySwapRegistry;
pub use postgres::PgSwapRegistry;

use crate::error::BridgeResult;
use crate::swap::{Swap, SwapId, SwapState, Transition};

use async_trait::async_trait;
use std::collections::HashMap;

/// Number of swaps per state, taken from one consistent view
pub type StateCounts = HashMap<SwapState, u64>;

#[async_trait]
pub trait SwapRegistry: Send + Sync {
    /// Persist a new record. Fails with `DuplicateAddress` if the deposit
    /// address was ever bound to another swap.
    async fn create(&self, swap: Swap) -> BridgeResult<()>;

    async fn get(&self, id: &SwapId) -> BridgeResult<Swap>;

    /// Atomically apply `transition` if the record is still in `expected`.
    ///
    /// Returns the updated record, or `StaleState` when another evaluation
    /// already moved it on.
    async fn update_state(
        &self,
        id: &SwapId,
        expected: SwapState,
        transition: Transition,
    ) -> BridgeResult<Swap>;

    async fn list_non_terminal(&self) -> BridgeResult<Vec<SwapId>>;

    async fn state_counts(&self) -> BridgeResult<StateCounts>;

    async fn health_check(&self) -> BridgeResult<()> {
        Ok(())
    }
}
