//! Swap records and the swap state machine

use crate::error::{BridgeError, BridgeResult};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Failure reason prefix used when the indexer stays unreachable past the escalation window
pub const ORACLE_UNAVAILABLE: &str = "OracleUnavailable";

/// Opaque swap identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(Uuid);

impl SwapId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SwapId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SwapId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SwapId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| BridgeError::SwapNotFound {
                swap_id: s.to_string(),
            })
    }
}

/// Swap lifecycle
///
/// ```text
/// Created -> AwaitingDeposit -> DepositSeen -> Confirmed -> Finalizing -> Completed
///    \              \                \              \             \
///     +--------------+----------------+--------------+--> Expired  +--> Failed
/// ```
///
/// `Failed` is reachable from every non-terminal state; `Expired` from every
/// state before `Finalizing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Created,
    AwaitingDeposit,
    DepositSeen,
    Confirmed,
    Finalizing,
    Completed,
    Expired,
    Failed,
}

impl SwapState {
    pub const ALL: [SwapState; 8] = [
        SwapState::Created,
        SwapState::AwaitingDeposit,
        SwapState::DepositSeen,
        SwapState::Confirmed,
        SwapState::Finalizing,
        SwapState::Completed,
        SwapState::Expired,
        SwapState::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::Completed | SwapState::Expired | SwapState::Failed
        )
    }

    /// Whether the expiry deadline still applies to this state
    pub fn is_expirable(&self) -> bool {
        matches!(
            self,
            SwapState::Created
                | SwapState::AwaitingDeposit
                | SwapState::DepositSeen
                | SwapState::Confirmed
        )
    }

    pub fn can_transition_to(&self, next: SwapState) -> bool {
        use SwapState::*;
        match (self, next) {
            (Created, AwaitingDeposit) => true,
            (AwaitingDeposit, DepositSeen) => true,
            (DepositSeen, Confirmed) => true,
            (Confirmed, Finalizing) => true,
            (Finalizing, Completed) => true,
            (from, Expired) => from.is_expirable(),
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapState::Created => "created",
            SwapState::AwaitingDeposit => "awaiting_deposit",
            SwapState::DepositSeen => "deposit_seen",
            SwapState::Confirmed => "confirmed",
            SwapState::Finalizing => "finalizing",
            SwapState::Completed => "completed",
            SwapState::Expired => "expired",
            SwapState::Failed => "failed",
        }
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapState {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwapState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| BridgeError::Internal(format!("Unknown swap state: {}", s)))
    }
}

/// Client request to open a swap
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub required_amount: u64,
    pub destination_recipient: String,
}

/// Deposit progress reported by the oracle for one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    pub observed_amount: u64,
    pub confirmation_count: u64,
}

/// A requested mutation of a swap record, applied under compare-and-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: SwapState,
    pub observation: Option<Observation>,
    pub finalization_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl Transition {
    pub fn to(state: SwapState) -> Self {
        Self {
            to: state,
            observation: None,
            finalization_ref: None,
            failure_reason: None,
        }
    }

    pub fn completed(finalization_ref: impl Into<String>) -> Self {
        Self {
            finalization_ref: Some(finalization_ref.into()),
            ..Self::to(SwapState::Completed)
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::to(SwapState::Failed)
        }
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }
}

/// One cross-chain value transfer tracked end to end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Swap {
    pub id: SwapId,
    pub source_deposit_address: String,
    /// Satoshis
    pub required_amount: u64,
    pub destination_recipient: String,
    pub state: SwapState,
    pub observed_amount: u64,
    pub confirmation_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalization_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl Swap {
    pub fn new(
        id: SwapId,
        source_deposit_address: String,
        required_amount: u64,
        destination_recipient: String,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            source_deposit_address,
            required_amount,
            destination_recipient,
            state: SwapState::Created,
            observed_amount: 0,
            confirmation_count: 0,
            created_at,
            expires_at: created_at + ttl,
            updated_at: created_at,
            finalization_ref: None,
            failure_reason: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_expirable() && now > self.expires_at
    }

    /// Value received beyond the required amount, kept for reconciliation
    pub fn excess_amount(&self) -> u64 {
        self.observed_amount.saturating_sub(self.required_amount)
    }

    /// Apply `transition` if the record is still in `expected`.
    ///
    /// Observation fields only ever grow; terminal records never change.
    pub fn apply(
        &mut self,
        expected: SwapState,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> BridgeResult<()> {
        if self.state == SwapState::Expired {
            return Err(BridgeError::ExpiredSwap { swap_id: self.id });
        }
        if self.state != expected {
            return Err(BridgeError::StaleState {
                swap_id: self.id,
                expected,
                actual: self.state,
            });
        }

        let invalid = BridgeError::InvalidStateTransition {
            from: self.state,
            to: transition.to,
        };
        if transition.to == self.state {
            // Progress-only update
            if transition.observation.is_none()
                || self.state.is_terminal()
                || self.state == SwapState::Finalizing
            {
                return Err(invalid);
            }
        } else if !self.state.can_transition_to(transition.to) {
            return Err(invalid);
        }

        match transition.to {
            SwapState::Completed => {
                let reference = transition
                    .finalization_ref
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .ok_or(invalid)?;
                self.finalization_ref = Some(reference.to_string());
            }
            SwapState::Failed => {
                self.failure_reason = Some(
                    transition
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string()),
                );
            }
            _ => {}
        }

        if let Some(observation) = transition.observation {
            self.observed_amount = self.observed_amount.max(observation.observed_amount);
            self.confirmation_count = self
                .confirmation_count
                .max(observation.confirmation_count);
        }

        self.state = transition.to;
        self.updated_at = now;
        Ok(())
    }
}
