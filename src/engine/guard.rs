//! Per-swap mutual exclusion for destination-ledger calls

use crate::swap::SwapId;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Hands out at most one `FinalizationToken` per swap id at a time
#[derive(Clone, Default)]
pub struct FinalizationGuard {
    in_flight: Arc<DashMap<SwapId, ()>>,
    idle: Arc<Notify>,
}

impl FinalizationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the swap, or `None` if a finalization is already in flight
    pub fn try_acquire(&self, swap_id: SwapId) -> Option<FinalizationToken> {
        match self.in_flight.entry(swap_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(FinalizationToken {
                    swap_id,
                    in_flight: self.in_flight.clone(),
                    idle: self.idle.clone(),
                })
            }
        }
    }

    /// Resolves once no token is held
    pub async fn wait_idle(&self) {
        loop {
            // Register before checking so a release in between is not missed
            let released = self.idle.notified();
            if self.in_flight.is_empty() {
                return;
            }
            released.await;
        }
    }
}

/// Released on drop
pub struct FinalizationToken {
    swap_id: SwapId,
    in_flight: Arc<DashMap<SwapId, ()>>,
    idle: Arc<Notify>,
}

impl Drop for FinalizationToken {
    fn drop(&mut self) {
        self.in_flight.remove(&self.swap_id);
        self.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_single_holder_per_swap() {
        let guard = FinalizationGuard::new();
        let id = SwapId::new();

        let token = guard.try_acquire(id).unwrap();
        assert!(guard.try_acquire(id).is_none());
        assert!(guard.try_acquire(SwapId::new()).is_some());

        drop(token);
        assert!(guard.try_acquire(id).is_some());
    }

    #[tokio::test]
    async fn test_wait_idle_until_last_release() {
        let guard = FinalizationGuard::new();
        guard.wait_idle().await;

        let first = guard.try_acquire(SwapId::new()).unwrap();
        let second = guard.try_acquire(SwapId::new()).unwrap();
        let waiter = tokio::spawn({
            let guard = guard.clone();
            async move { guard.wait_idle().await }
        });

        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
