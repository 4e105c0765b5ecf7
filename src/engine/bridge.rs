//! Bridge engine: swap creation, deposit monitoring and finalization

use super::guard::FinalizationGuard;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::BridgeEvent;
use crate::issuer::DepositAddressIssuer;
use crate::ledger::{parse_recipient, DestinationLedger};
use crate::oracle::{AddressStatus, ConfirmationOracle};
use crate::registry::SwapRegistry;
use crate::swap::{
    Observation, Swap, SwapId, SwapRequest, SwapState, Transition, ORACLE_UNAVAILABLE,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Rounds of refetch-and-retry when a concurrent evaluation wins the CAS
const MAX_STALE_RETRIES: usize = 3;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Cross-chain swap engine
pub struct BridgeEngine {
    /// Swap records
    registry: Arc<dyn SwapRegistry>,
    /// Deposit address source
    issuer: DepositAddressIssuer,
    /// Source-chain deposit status
    oracle: Arc<dyn ConfirmationOracle>,
    /// Destination-chain credit
    ledger: Arc<dyn DestinationLedger>,
    /// At most one ledger call per swap
    finalizations: FinalizationGuard,
    /// First failed oracle query per swap, cleared on the next success
    oracle_failures: DashMap<SwapId, DateTime<Utc>>,
    /// Event broadcast channel
    event_tx: broadcast::Sender<BridgeEvent>,
    /// Configuration
    config: BridgeConfig,
    /// Shutdown signal
    shutdown: watch::Sender<bool>,
}

impl BridgeEngine {
    pub fn new(
        registry: Arc<dyn SwapRegistry>,
        issuer: DepositAddressIssuer,
        oracle: Arc<dyn ConfirmationOracle>,
        ledger: Arc<dyn DestinationLedger>,
        config: BridgeConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            registry,
            issuer,
            oracle,
            ledger,
            finalizations: FinalizationGuard::new(),
            oracle_failures: DashMap::new(),
            event_tx,
            config,
            shutdown,
        }
    }

    /// Subscribe to bridge events
    pub fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.event_tx.subscribe()
    }

    pub async fn get_swap(&self, id: &SwapId) -> BridgeResult<Swap> {
        self.registry.get(id).await
    }

    /// Open a swap: issue a deposit address, persist the record and start
    /// awaiting the deposit. Nothing is persisted if issuance fails.
    pub async fn create_swap(
        &self,
        request: SwapRequest,
        now: DateTime<Utc>,
    ) -> BridgeResult<Swap> {
        if request.required_amount == 0 {
            return Err(BridgeError::InvalidRequest(
                "requiredAmount must be positive".to_string(),
            ));
        }
        if request.required_amount > bitcoin::Amount::MAX_MONEY.to_sat() {
            return Err(BridgeError::InvalidRequest(format!(
                "requiredAmount {} exceeds the bitcoin supply",
                request.required_amount
            )));
        }
        let recipient = parse_recipient(&request.destination_recipient)?;

        let id = SwapId::new();
        let address = self.issuer.issue_address(&id).await?;

        let swap = Swap::new(
            id,
            address,
            request.required_amount,
            recipient,
            now,
            self.config.swap_ttl(),
        );

        match self.registry.create(swap.clone()).await {
            Ok(()) => {}
            Err(BridgeError::DuplicateAddress { address, swap_id }) => {
                error!(
                    "Key provider reissued {} (already bound to swap {})",
                    address, swap_id
                );
                return Err(BridgeError::AddressIssuance(format!(
                    "Provider returned address {} already bound to swap {}",
                    address, swap_id
                )));
            }
            Err(e) => return Err(e),
        }

        info!(
            "Swap {} created: {} sats to {} via {}",
            id, swap.required_amount, swap.destination_recipient, swap.source_deposit_address
        );
        self.emit(BridgeEvent::SwapCreated {
            swap_id: id,
            deposit_address: swap.source_deposit_address.clone(),
            required_amount: swap.required_amount,
        });

        self.transition(&swap, Transition::to(SwapState::AwaitingDeposit))
            .await
    }

    /// Main monitor loop
    pub async fn run(self: &Arc<Self>) -> BridgeResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Bridge engine {} started (poll every {:?})",
            self.config.instance_id,
            self.config.poll_interval()
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("Monitor tick failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {}
            }
        }

        info!("Bridge engine stopped");
        Ok(())
    }

    /// Stop the monitor loop
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        info!("Bridge engine shutdown initiated");
    }

    /// Wait until no finalization task is running
    pub async fn wait_for_finalizations(&self) {
        self.finalizations.wait_idle().await;
    }

    /// Evaluate every non-terminal swap once, up to the configured concurrency.
    /// Ledger credits run on their own tasks and never hold up the tick.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> BridgeResult<()> {
        let started = Instant::now();
        let active = self.registry.list_non_terminal().await?;
        let count = active.len();

        stream::iter(active)
            .for_each_concurrent(self.config.max_concurrent_evaluations, |swap_id| async move {
                if let Err(e) = self.evaluate_swap(swap_id, now).await {
                    if e.should_alert() {
                        error!("Evaluation of swap {} failed: {}", swap_id, e);
                    } else {
                        warn!("Evaluation of swap {} failed: {}", swap_id, e);
                    }
                }
            })
            .await;

        debug!("Evaluated {} active swaps in {:?}", count, started.elapsed());
        crate::metrics::record_tick(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Evaluate one swap, re-reading it whenever a concurrent evaluation wins
    pub async fn evaluate_swap(
        self: &Arc<Self>,
        swap_id: SwapId,
        now: DateTime<Utc>,
    ) -> BridgeResult<()> {
        for _ in 0..MAX_STALE_RETRIES {
            match self.evaluate_once(swap_id, now).await {
                Err(BridgeError::StaleState {
                    expected, actual, ..
                }) => {
                    debug!(
                        "Swap {} moved from {} to {} concurrently, re-evaluating",
                        swap_id, expected, actual
                    );
                }
                Err(BridgeError::ExpiredSwap { .. }) => {
                    info!("Swap {} expired before it could advance", swap_id);
                    return Ok(());
                }
                other => return other,
            }
        }

        warn!("Swap {} kept changing under evaluation, deferring to next tick", swap_id);
        Ok(())
    }

    async fn evaluate_once(
        self: &Arc<Self>,
        swap_id: SwapId,
        now: DateTime<Utc>,
    ) -> BridgeResult<()> {
        let swap = self.registry.get(&swap_id).await?;

        if swap.state.is_terminal() {
            return Ok(());
        }
        if swap.is_expired(now) {
            info!("Swap {} expired at {} in state {}", swap.id, swap.expires_at, swap.state);
            self.oracle_failures.remove(&swap.id);
            self.transition(&swap, Transition::to(SwapState::Expired)).await?;
            return Ok(());
        }

        match swap.state {
            // Address already bound; recover a record written before a crash
            SwapState::Created => {
                self.transition(&swap, Transition::to(SwapState::AwaitingDeposit))
                    .await?;
                Ok(())
            }
            SwapState::AwaitingDeposit | SwapState::DepositSeen => {
                self.poll_deposit(swap, now).await
            }
            SwapState::Confirmed | SwapState::Finalizing => {
                self.spawn_finalization(swap_id);
                Ok(())
            }
            SwapState::Completed | SwapState::Expired | SwapState::Failed => Ok(()),
        }
    }

    async fn poll_deposit(self: &Arc<Self>, swap: Swap, now: DateTime<Utc>) -> BridgeResult<()> {
        let status = match self.query_oracle(&swap.source_deposit_address).await {
            Ok(status) => {
                self.oracle_failures.remove(&swap.id);
                status
            }
            Err(e) => return self.handle_oracle_failure(&swap, e, now).await,
        };

        let observation = Observation {
            observed_amount: status.observed_amount,
            confirmation_count: status.confirmations_for(swap.required_amount),
        };
        self.check_reorg(&swap, &observation);

        let progressed = observation.observed_amount > swap.observed_amount
            || observation.confirmation_count > swap.confirmation_count;

        let mut swap = swap;
        if swap.state == SwapState::AwaitingDeposit {
            if !status.has_activity() {
                return Ok(());
            }
            swap = self
                .transition(
                    &swap,
                    Transition::to(SwapState::DepositSeen).with_observation(observation),
                )
                .await?;
        } else if progressed {
            swap = self
                .transition(
                    &swap,
                    Transition::to(SwapState::DepositSeen).with_observation(observation),
                )
                .await?;
        }

        if !self.is_eligible(&swap, &observation) {
            if observation.observed_amount < swap.required_amount
                && observation.confirmation_count >= self.config.confirmation_threshold
            {
                debug!(
                    "Swap {} underpaid: {} of {} sats confirmed",
                    swap.id, observation.observed_amount, swap.required_amount
                );
            }
            return Ok(());
        }

        self.transition(
            &swap,
            Transition::to(SwapState::Confirmed).with_observation(observation),
        )
        .await?;
        self.spawn_finalization(swap.id);
        Ok(())
    }

    /// Finalization needs the amount and confirmations in the current report,
    /// not just the recorded maxima, so an unconfirmed top-up cannot ride on
    /// confirmations of an earlier deposit
    fn is_eligible(&self, swap: &Swap, fresh: &Observation) -> bool {
        fresh.observed_amount >= swap.required_amount
            && fresh.confirmation_count >= self.config.confirmation_threshold
            && swap.observed_amount >= swap.required_amount
            && swap.confirmation_count >= self.config.confirmation_threshold
    }

    async fn query_oracle(&self, address: &str) -> BridgeResult<AddressStatus> {
        match timeout(self.config.oracle_timeout(), self.oracle.query_address(address)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::OracleQuery {
                address: address.to_string(),
                message: format!("no answer within {:?}", self.config.oracle_timeout()),
            }),
        }
    }

    async fn handle_oracle_failure(
        &self,
        swap: &Swap,
        err: BridgeError,
        now: DateTime<Utc>,
    ) -> BridgeResult<()> {
        let first_failure = *self.oracle_failures.entry(swap.id).or_insert(now);
        let outage = now.signed_duration_since(first_failure);

        warn!(
            "Oracle query for swap {} failed ({}s into outage): {}",
            swap.id,
            outage.num_seconds(),
            err
        );
        self.emit(BridgeEvent::OracleQueryFailed {
            swap_id: swap.id,
            message: err.to_string(),
        });

        if outage < self.config.oracle_unavailable_after() {
            return Ok(());
        }

        error!("Oracle unavailable for swap {} since {}", swap.id, first_failure);
        self.oracle_failures.remove(&swap.id);
        self.transition(
            swap,
            Transition::failed(format!("{}: {}", ORACLE_UNAVAILABLE, err)),
        )
        .await?;
        Ok(())
    }

    fn check_reorg(&self, swap: &Swap, fresh: &Observation) {
        let amount_dropped = fresh.observed_amount < swap.observed_amount;
        let confirmations_dropped = fresh.observed_amount == swap.observed_amount
            && fresh.confirmation_count < swap.confirmation_count;

        if amount_dropped || confirmations_dropped {
            warn!(
                "Reorg suspected at {} for swap {}: recorded {} sats/{} conf, oracle reports {} sats/{} conf",
                swap.source_deposit_address,
                swap.id,
                swap.observed_amount,
                swap.confirmation_count,
                fresh.observed_amount,
                fresh.confirmation_count
            );
            self.emit(BridgeEvent::ReorgDetected {
                swap_id: swap.id,
                address: swap.source_deposit_address.clone(),
                recorded_amount: swap.observed_amount,
                reported_amount: fresh.observed_amount,
                recorded_confirmations: swap.confirmation_count,
                reported_confirmations: fresh.confirmation_count,
            });
        }
    }

    /// Finalize on a background task holding the swap's token
    fn spawn_finalization(self: &Arc<Self>, swap_id: SwapId) {
        let Some(token) = self.finalizations.try_acquire(swap_id) else {
            debug!("Finalization of swap {} already in flight", swap_id);
            return;
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _token = token;
            if let Err(e) = engine.finalize(swap_id).await {
                if e.should_alert() {
                    error!("Finalization task for swap {} failed: {}", swap_id, e);
                } else {
                    warn!("Finalization task for swap {} failed: {}", swap_id, e);
                }
            }
        });
    }

    /// Drive a `Confirmed` or interrupted `Finalizing` swap to a terminal
    /// state. Callers hold the swap's finalization token.
    async fn finalize(&self, swap_id: SwapId) -> BridgeResult<()> {
        // A previous holder may have finished
        let swap = self.registry.get(&swap_id).await?;
        let swap = match swap.state {
            SwapState::Confirmed => {
                self.transition(&swap, Transition::to(SwapState::Finalizing))
                    .await?
            }
            SwapState::Finalizing => {
                info!("Resuming interrupted finalization of swap {}", swap_id);
                swap
            }
            _ => return Ok(()),
        };

        let started = Instant::now();
        match self.credit_with_retry(&swap).await {
            Ok(reference) => {
                let completed = self
                    .transition(&swap, Transition::completed(reference))
                    .await?;
                if completed.excess_amount() > 0 {
                    warn!(
                        "Swap {} overpaid by {} sats; credited {} of {} observed",
                        completed.id,
                        completed.excess_amount(),
                        completed.required_amount,
                        completed.observed_amount
                    );
                }
                crate::metrics::record_finalization("completed", started.elapsed().as_secs_f64());
            }
            Err(e) => {
                error!("Finalization of swap {} failed: {}", swap_id, e);
                self.transition(&swap, Transition::failed(e.to_string()))
                    .await?;
                crate::metrics::record_finalization("failed", started.elapsed().as_secs_f64());
            }
        }

        Ok(())
    }

    /// Credit the recipient, retrying with exponential backoff
    async fn credit_with_retry(&self, swap: &Swap) -> BridgeResult<String> {
        let max_attempts = self.config.finalization_max_retries.max(1);
        let mut delay = Duration::from_millis(self.config.finalization_retry_delay_ms);
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let call = self.ledger.credit(
                &swap.destination_recipient,
                swap.required_amount,
                &swap.id,
            );

            let err = match timeout(self.config.finalization_timeout(), call).await {
                Ok(Ok(reference)) => {
                    info!(
                        "Swap {} credited on attempt {}/{}: {}",
                        swap.id, attempt, max_attempts, reference
                    );
                    return Ok(reference);
                }
                Ok(Err(e)) => e,
                Err(_) => BridgeError::Timeout {
                    operation: format!("credit for swap {}", swap.id),
                },
            };

            warn!(
                "Credit attempt {}/{} for swap {} failed: {}",
                attempt, max_attempts, swap.id, err
            );
            self.emit(BridgeEvent::FinalizationAttemptFailed {
                swap_id: swap.id,
                attempt,
                message: err.to_string(),
            });
            let retryable = err.is_retryable();
            last_error = Some(err);

            if !retryable {
                break;
            }
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(BridgeError::Finalization {
            swap_id: swap.id,
            attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    /// Commit a transition against the state `swap` was read in
    async fn transition(&self, swap: &Swap, transition: Transition) -> BridgeResult<Swap> {
        let to = transition.to;
        let updated = self
            .registry
            .update_state(&swap.id, swap.state, transition)
            .await?;

        if swap.state != to {
            info!("Swap {}: {} -> {}", swap.id, swap.state, to);
            self.emit(BridgeEvent::StateChanged {
                swap_id: swap.id,
                from: swap.state,
                to,
            });
        }
        Ok(updated)
    }

    fn emit(&self, event: BridgeEvent) {
        debug!(
            "Bridge event {} for swap {}: {:?}",
            event.name(),
            event.swap_id(),
            event
        );
        crate::metrics::record_event(&event);

        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}
