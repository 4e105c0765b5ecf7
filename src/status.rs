//! Aggregate swap counters for the status surface

use crate::error::BridgeResult;
use crate::registry::SwapRegistry;
use crate::swap::SwapState;

use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub pending_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub expired_count: u64,
}

pub struct StatusReporter {
    registry: Arc<dyn SwapRegistry>,
}

impl StatusReporter {
    pub fn new(registry: Arc<dyn SwapRegistry>) -> Self {
        Self { registry }
    }

    /// Bucket every swap exactly once, from a single registry view
    pub async fn snapshot(&self) -> BridgeResult<StatusSnapshot> {
        let counts = self.registry.state_counts().await?;

        let mut snapshot = StatusSnapshot::default();
        for (state, count) in counts {
            match state {
                SwapState::Completed => snapshot.completed_count += count,
                SwapState::Failed => snapshot.failed_count += count,
                SwapState::Expired => snapshot.expired_count += count,
                _ => snapshot.pending_count += count,
            }
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemorySwapRegistry;
    use crate::swap::{Swap, SwapId, Transition};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_snapshot_buckets() {
        let registry = Arc::new(InMemorySwapRegistry::new());
        let reporter = StatusReporter::new(registry.clone());
        assert_eq!(reporter.snapshot().await.unwrap(), StatusSnapshot::default());

        let mut ids = Vec::new();
        for n in 0..4 {
            let swap = Swap::new(
                SwapId::new(),
                format!("bcrt1q{}", n),
                1_000,
                "0x0000000000000000000000000000000000000001".to_string(),
                Utc::now(),
                Duration::seconds(60),
            );
            ids.push(swap.id);
            registry.create(swap).await.unwrap();
        }
        registry
            .update_state(&ids[0], SwapState::Created, Transition::to(SwapState::Expired))
            .await
            .unwrap();
        registry
            .update_state(&ids[1], SwapState::Created, Transition::failed("boom"))
            .await
            .unwrap();
        registry
            .update_state(&ids[2], SwapState::Created, Transition::to(SwapState::AwaitingDeposit))
            .await
            .unwrap();

        let snapshot = reporter.snapshot().await.unwrap();
        assert_eq!(
            snapshot,
            StatusSnapshot {
                pending_count: 2,
                completed_count: 0,
                failed_count: 1,
                expired_count: 1,
            }
        );
    }
}
