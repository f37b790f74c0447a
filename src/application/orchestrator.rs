use crate::application::allowance::AllowanceGate;
use crate::application::fulfillment::FulfillmentCoordinator;
use crate::application::payment::PaymentSubmitter;
use crate::domain::asset::{AssetKind, AssetRegistry};
use crate::domain::flows::ValidatorRef;
use crate::domain::order::{Order, OrderIntent, PurchaseStatus};
use crate::domain::ports::{Address, BillingRef, ChainRef, NetworkId, RateRef, WalletRef};
use crate::error::{PurchaseError, Result, Stage, StageError};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Deployment-level knobs for the orchestrator.
pub struct OrchestratorSettings {
    /// The chain the order contract is deployed on.
    pub network: NetworkId,
    /// Contract that receives payments and records orders; also the spender
    /// for token approvals.
    pub order_contract: Address,
    pub min_fiat: Decimal,
}

/// Publishes status snapshots to the UI and tracks which attempt is allowed
/// to publish. Dismissal zeroes the active attempt, so a task still draining
/// an abandoned attempt can no longer touch observable state.
pub struct StatusFeed {
    tx: watch::Sender<PurchaseStatus>,
    active: AtomicU64,
    next: AtomicU64,
}

impl StatusFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PurchaseStatus::idle());
        Self {
            tx,
            active: AtomicU64::new(0),
            next: AtomicU64::new(0),
        }
    }

    /// Claims the single in-flight slot. `None` while another attempt holds
    /// it, including attempts sitting in a terminal state awaiting
    /// dismissal.
    pub fn begin(&self) -> Option<Attempt<'_>> {
        let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.active
            .compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(Attempt { feed: self, id })
    }

    pub fn subscribe(&self) -> watch::Receiver<PurchaseStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> PurchaseStatus {
        self.tx.borrow().clone()
    }

    pub fn dismiss(&self) {
        self.active.store(0, Ordering::SeqCst);
        self.tx.send_replace(PurchaseStatus::idle());
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// One purchase attempt's handle onto the feed.
pub struct Attempt<'a> {
    feed: &'a StatusFeed,
    id: u64,
}

impl Attempt<'_> {
    pub fn publish(&self, order: &Order) {
        self.send(order.snapshot());
    }

    pub fn send(&self, status: PurchaseStatus) {
        if self.is_active() {
            self.feed.tx.send_replace(status);
        }
    }

    pub fn is_active(&self) -> bool {
        self.feed.active.load(Ordering::SeqCst) == self.id
    }

    /// Aborts before any transaction: frees the slot and shows Idle plus the
    /// error, so the user retries without consuming a request id.
    pub fn abort(&self, status: PurchaseStatus) {
        if self
            .feed
            .active
            .compare_exchange(self.id, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.feed.tx.send_replace(status);
        }
    }
}

/// The state machine driving a purchase from intent to terminal state:
/// prerequisite validation, optional token approval, the payment
/// transaction, and the billing-provider fulfillment call, in that order,
/// with a single coherent status exposed throughout.
pub struct PurchaseOrchestrator {
    registry: AssetRegistry,
    settings: OrchestratorSettings,
    wallet: WalletRef,
    rates: RateRef,
    validator: ValidatorRef,
    gate: AllowanceGate,
    submitter: PaymentSubmitter,
    coordinator: FulfillmentCoordinator,
    feed: StatusFeed,
}

impl PurchaseOrchestrator {
    pub fn new(
        registry: AssetRegistry,
        settings: OrchestratorSettings,
        wallet: WalletRef,
        chain: ChainRef,
        rates: RateRef,
        billing: BillingRef,
        validator: ValidatorRef,
    ) -> Self {
        Self {
            registry,
            settings,
            wallet,
            rates,
            validator,
            gate: AllowanceGate::new(chain.clone()),
            submitter: PaymentSubmitter::new(chain),
            coordinator: FulfillmentCoordinator::new(billing),
            feed: StatusFeed::new(),
        }
    }

    /// Status stream; a new value is pushed on every transition.
    pub fn subscribe(&self) -> watch::Receiver<PurchaseStatus> {
        self.feed.subscribe()
    }

    pub fn current(&self) -> PurchaseStatus {
        self.feed.current()
    }

    /// Closes the status view. Always returns observable state to Idle; an
    /// already-broadcast transaction keeps confirming or failing on-chain
    /// regardless.
    pub fn dismiss(&self) {
        debug!("status view dismissed");
        self.feed.dismiss();
    }

    /// Fire-and-forget variant of [`purchase`](Self::purchase).
    pub fn spawn_purchase(self: &Arc<Self>, intent: OrderIntent) -> JoinHandle<Result<()>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.purchase(intent).await })
    }

    /// Runs one purchase attempt to completion. Prerequisite failures abort
    /// back to Idle without consuming a request id; stage failures land in
    /// the matching failed state on the status feed. The returned error
    /// mirrors what the feed shows.
    pub async fn purchase(&self, intent: OrderIntent) -> Result<()> {
        let attempt = self.feed.begin().ok_or(PurchaseError::Busy)?;
        attempt.send(PurchaseStatus::validating());

        let (mut order, owner) = match self.validate(&intent).await {
            Ok(validated) => validated,
            Err(error) => {
                warn!(%error, "purchase aborted during validation");
                attempt.abort(PurchaseStatus::aborted(StageError::new(
                    Stage::Prerequisite,
                    &error,
                )));
                return Err(error);
            }
        };
        info!(
            request_id = %order.request_id,
            asset = %order.asset.symbol,
            fiat = %order.fiat_amount,
            crypto = %order.crypto_amount,
            "purchase attempt started"
        );
        self.run(&attempt, &mut order, owner).await
    }

    async fn validate(&self, intent: &OrderIntent) -> Result<(Order, Address)> {
        if !self.wallet.is_ready() {
            return Err(PurchaseError::WalletNotReady);
        }
        // Network is shared mutable state: read it now, never from a cache.
        let actual = self.wallet.current_network();
        if actual != self.settings.network {
            let switched = self.wallet.request_switch(self.settings.network).await?;
            if !switched {
                return Err(PurchaseError::SwitchRejected);
            }
            // Trust the re-read, not the prompt's answer.
            let actual = self.wallet.current_network();
            if actual != self.settings.network {
                return Err(PurchaseError::WrongNetwork {
                    expected: self.settings.network,
                    actual,
                });
            }
        }
        let owner = self.wallet.address().ok_or(PurchaseError::WalletNotReady)?;

        self.validator.validate(&intent.target)?;
        if intent.fiat_amount < self.settings.min_fiat {
            return Err(PurchaseError::Validation(format!(
                "minimum purchase is {}",
                self.settings.min_fiat
            )));
        }

        let asset = self.registry.describe(&intent.asset)?.clone();
        let rate = self
            .rates
            .rate(&asset.symbol)
            .await?
            .ok_or_else(|| PurchaseError::RateUnavailable(asset.symbol.clone()))?;
        let crypto_amount = if rate > Decimal::ZERO {
            intent.fiat_amount.checked_div(rate)
        } else {
            None
        }
        .filter(|amount| *amount > Decimal::ZERO)
        .ok_or_else(|| {
            PurchaseError::Validation(format!("cannot price order at rate {rate}"))
        })?;

        Ok((
            Order::new(asset, intent.fiat_amount, crypto_amount, intent.target.clone()),
            owner,
        ))
    }

    async fn run(&self, attempt: &Attempt<'_>, order: &mut Order, owner: Address) -> Result<()> {
        if order.asset.kind == AssetKind::FungibleToken {
            // The fresh allowance read decides whether the approval
            // sub-sequence runs; a confirmed approval continues straight
            // into payment within the same attempt.
            self.gate
                .ensure_allowance(attempt, order, owner, self.settings.order_contract)
                .await?;
        }

        if !attempt.is_active() {
            // Dismissed while the approval was confirming. Only a
            // transaction that was already broadcast is drained to
            // completion; the payment has not been, so it must not be.
            warn!(
                request_id = %order.request_id,
                "attempt dismissed before payment, not broadcasting"
            );
            return Ok(());
        }

        let payment_tx = self
            .submitter
            .submit_payment(attempt, order, self.settings.order_contract)
            .await?;

        if !attempt.is_active() {
            // Dismissed while the payment was confirming. The funds have
            // moved; fulfillment is deliberately not invoked for an
            // abandoned attempt and the request id stays valid for manual
            // reconciliation.
            warn!(
                request_id = %order.request_id,
                tx = ?payment_tx.hash,
                "attempt dismissed after payment confirmation, skipping fulfillment"
            );
            return Ok(());
        }

        self.coordinator.fulfill(attempt, order, &payment_tx).await?;
        Ok(())
    }
}
