//! Bridge event types
//!
//! Events published by the engine while it drives swaps through their lifecycle.

use crate::swap::{SwapId, SwapState};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Swap record written with its deposit address
    SwapCreated {
        swap_id: SwapId,
        deposit_address: String,
        required_amount: u64,
    },

    /// Committed state transition
    StateChanged {
        swap_id: SwapId,
        from: SwapState,
        to: SwapState,
    },

    /// Oracle reported less than previously recorded; the record keeps its maxima
    ReorgDetected {
        swap_id: SwapId,
        address: String,
        recorded_amount: u64,
        reported_amount: u64,
        recorded_confirmations: u64,
        reported_confirmations: u64,
    },

    /// Oracle query failed for this tick
    OracleQueryFailed { swap_id: SwapId, message: String },

    /// One destination-ledger credit attempt failed
    FinalizationAttemptFailed {
        swap_id: SwapId,
        attempt: u32,
        message: String,
    },
}

impl BridgeEvent {
    pub fn swap_id(&self) -> SwapId {
        match self {
            BridgeEvent::SwapCreated { swap_id, .. } => *swap_id,
            BridgeEvent::StateChanged { swap_id, .. } => *swap_id,
            BridgeEvent::ReorgDetected { swap_id, .. } => *swap_id,
            BridgeEvent::OracleQueryFailed { swap_id, .. } => *swap_id,
            BridgeEvent::FinalizationAttemptFailed { swap_id, .. } => *swap_id,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::SwapCreated { .. } => "swap_created",
            BridgeEvent::StateChanged { .. } => "state_changed",
            BridgeEvent::ReorgDetected { .. } => "reorg_detected",
            BridgeEvent::OracleQueryFailed { .. } => "oracle_query_failed",
            BridgeEvent::FinalizationAttemptFailed { .. } => "finalization_attempt_failed",
        }
    }

    /// Check if this event should page an operator
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            BridgeEvent::ReorgDetected { .. }
                | BridgeEvent::StateChanged {
                    to: SwapState::Failed,
                    ..
                }
        )
    }
}
