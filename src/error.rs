//! Error types for the bridge

use crate::swap::{SwapId, SwapState};

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Address issuance failed: {0}")]
    AddressIssuance(String),

    #[error("Oracle query failed for {address}: {message}")]
    OracleQuery { address: String, message: String },

    #[error("Stale state for swap {swap_id}: expected {expected}, found {actual}")]
    StaleState {
        swap_id: SwapId,
        expected: SwapState,
        actual: SwapState,
    },

    #[error("Finalization of swap {swap_id} failed after {attempts} attempts: {message}")]
    Finalization {
        swap_id: SwapId,
        attempts: u32,
        message: String,
    },

    #[error("Destination ledger error: {0}")]
    Ledger(String),

    #[error("Swap {swap_id} has expired")]
    ExpiredSwap { swap_id: SwapId },

    #[error("Swap {swap_id} not found")]
    SwapNotFound { swap_id: String },

    #[error("Deposit address {address} is already bound to swap {swap_id}")]
    DuplicateAddress { address: String, swap_id: SwapId },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: SwapState, to: SwapState },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::OracleQuery { .. }
                | BridgeError::Ledger(_)
                | BridgeError::Timeout { .. }
                | BridgeError::StaleState { .. }
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            BridgeError::Finalization { .. }
                | BridgeError::DuplicateAddress { .. }
                | BridgeError::Database(_)
        )
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
