//! Deterministic in-memory collaborators: a wallet, a chain, a rate source
//! and a billing provider with failure injection. The demo binary and the
//! integration tests run the orchestrator against these.

use crate::domain::flows::ServiceKind;
use crate::domain::ports::{
    Address, AssetPayload, BillingProvider, ChainClient, CustomerInfo, FulfillmentReceipt,
    FulfillmentRequest, NetworkId, RateProvider, Receipt, ReceiptStatus, TxHandle, TxHash,
    TxPhase, TxProgress, TxSpec, WalletContext,
};
use crate::error::{PurchaseError, Result};
use async_trait::async_trait;
use primitive_types::{H256, U256};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Polls until a transaction leaves the submitted phase.
const CONFIRM_POLLS: u32 = 2;

pub struct SimWallet {
    address: Address,
    ready: AtomicBool,
    network: AtomicU64,
    accept_switch: AtomicBool,
}

impl SimWallet {
    pub fn new(address: Address, network: NetworkId) -> Self {
        Self {
            address,
            ready: AtomicBool::new(true),
            network: AtomicU64::new(network.0),
            accept_switch: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_network(&self, network: NetworkId) {
        self.network.store(network.0, Ordering::SeqCst);
    }

    pub fn refuse_switches(&self) {
        self.accept_switch.store(false, Ordering::SeqCst);
    }

    pub fn accept_switches(&self) {
        self.accept_switch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletContext for SimWallet {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn address(&self) -> Option<Address> {
        self.ready.load(Ordering::SeqCst).then_some(self.address)
    }

    fn current_network(&self) -> NetworkId {
        NetworkId(self.network.load(Ordering::SeqCst))
    }

    async fn request_switch(&self, network: NetworkId) -> Result<bool> {
        if self.accept_switch.load(Ordering::SeqCst) {
            self.network.store(network.0, Ordering::SeqCst);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

struct SimTx {
    spec: TxSpec,
    polls: u32,
    revert: Option<String>,
    applied: bool,
}

#[derive(Default)]
struct ChainState {
    allowances: HashMap<(Address, Address, Address), U256>,
    txs: HashMap<TxHash, SimTx>,
    submitted: Vec<TxSpec>,
    next_nonce: u64,
    reject_next_signature: bool,
    fail_next_simulation: Option<String>,
    revert_next: Option<String>,
}

/// Simulated chain. Transactions confirm after a fixed number of receipt
/// polls; the progress flags accumulate the way a real client's derived
/// booleans do, so confirmation goes through the priority classifier.
pub struct SimChain {
    sender: Address,
    state: Mutex<ChainState>,
    hold_confirmations: AtomicBool,
    allowance_reads: AtomicUsize,
}

impl SimChain {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            state: Mutex::new(ChainState::default()),
            hold_confirmations: AtomicBool::new(false),
            allowance_reads: AtomicUsize::new(0),
        }
    }

    pub async fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        let mut state = self.state.lock().await;
        state.allowances.insert((token, owner, spender), amount);
    }

    pub async fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        let state = self.state.lock().await;
        state
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    /// Everything broadcast so far, in submission order.
    pub async fn submitted(&self) -> Vec<TxSpec> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn is_confirmed(&self, hash: TxHash) -> bool {
        let state = self.state.lock().await;
        state
            .txs
            .get(&hash)
            .is_some_and(|tx| tx.revert.is_none() && tx.polls >= CONFIRM_POLLS)
    }

    /// Transactions that have reached one confirmation.
    pub async fn confirmed_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .txs
            .values()
            .filter(|tx| tx.revert.is_none() && tx.polls >= CONFIRM_POLLS)
            .count()
    }

    /// The user declines the next signature prompt.
    pub async fn reject_next_signature(&self) {
        self.state.lock().await.reject_next_signature = true;
    }

    /// The next submission fails simulation before broadcast.
    pub async fn fail_next_simulation(&self, reason: &str) {
        self.state.lock().await.fail_next_simulation = Some(reason.to_string());
    }

    /// The next broadcast transaction reverts on-chain.
    pub async fn revert_next(&self, reason: &str) {
        self.state.lock().await.revert_next = Some(reason.to_string());
    }

    /// Freezes receipt progress so tests can act mid-confirmation.
    pub fn hold_confirmations(&self, hold: bool) {
        self.hold_confirmations.store(hold, Ordering::SeqCst);
    }

    pub fn allowance_reads(&self) -> usize {
        self.allowance_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for SimChain {
    async fn read_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256> {
        tokio::task::yield_now().await;
        self.allowance_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.allowance_of(token, owner, spender).await)
    }

    async fn submit_transaction(&self, spec: TxSpec) -> Result<TxHandle> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        if std::mem::take(&mut state.reject_next_signature) {
            return Err(PurchaseError::SignatureRejected);
        }
        if let Some(reason) = state.fail_next_simulation.take() {
            return Err(PurchaseError::SimulationFailed(reason));
        }

        state.next_nonce += 1;
        let digest: [u8; 32] = Sha256::digest(state.next_nonce.to_be_bytes()).into();
        let hash = H256(digest);
        let revert = state.revert_next.take();
        state.submitted.push(spec.clone());
        state.txs.insert(
            hash,
            SimTx {
                spec,
                polls: 0,
                revert,
                applied: false,
            },
        );
        Ok(TxHandle(hash))
    }

    async fn await_receipt(&self, handle: TxHandle) -> Result<Receipt> {
        loop {
            let outcome = {
                let mut state = self.state.lock().await;
                let held = self.hold_confirmations.load(Ordering::SeqCst);
                let tx = state.txs.get_mut(&handle.0).ok_or_else(|| {
                    PurchaseError::Rpc(format!("unknown transaction {:?}", handle.0))
                })?;
                if !held {
                    tx.polls += 1;
                }
                let progress = TxProgress {
                    pending: true,
                    submitted: true,
                    confirming: tx.polls >= 1,
                    confirmed: tx.revert.is_none() && tx.polls >= CONFIRM_POLLS,
                    errored: tx.revert.is_some() && tx.polls >= CONFIRM_POLLS,
                };
                match TxPhase::classify(progress) {
                    TxPhase::Errored => Some(ReceiptStatus::Reverted(
                        tx.revert.clone().unwrap_or_else(|| "reverted".to_string()),
                    )),
                    TxPhase::Confirmed => {
                        let apply = !tx.applied;
                        tx.applied = true;
                        let spec = tx.spec.clone();
                        if apply {
                            match spec {
                                TxSpec::Approval {
                                    token,
                                    spender,
                                    amount,
                                } => {
                                    state.allowances.insert((token, self.sender, spender), amount);
                                }
                                TxSpec::Payment {
                                    to,
                                    asset: AssetPayload::Token { token, amount },
                                    ..
                                } => {
                                    // transferFrom spends the approval.
                                    let entry = state
                                        .allowances
                                        .entry((token, self.sender, to))
                                        .or_default();
                                    *entry = entry.saturating_sub(amount);
                                }
                                TxSpec::Payment { .. } => {}
                            }
                        }
                        Some(ReceiptStatus::Success)
                    }
                    _ => None,
                }
            };
            match outcome {
                Some(status) => {
                    return Ok(Receipt {
                        tx_hash: handle.0,
                        status,
                    });
                }
                None => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }
    }
}

pub struct SimRates {
    rates: Mutex<HashMap<String, Decimal>>,
}

impl SimRates {
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, Decimal)>) -> Self {
        Self {
            rates: Mutex::new(
                pairs
                    .into_iter()
                    .map(|(symbol, rate)| (symbol.to_string(), rate))
                    .collect(),
            ),
        }
    }

    pub async fn set_rate(&self, symbol: &str, rate: Decimal) {
        self.rates.lock().await.insert(symbol.to_string(), rate);
    }

    pub async fn clear_rate(&self, symbol: &str) {
        self.rates.lock().await.remove(symbol);
    }
}

#[async_trait]
impl RateProvider for SimRates {
    async fn rate(&self, symbol: &str) -> Result<Option<Decimal>> {
        tokio::task::yield_now().await;
        Ok(self.rates.lock().await.get(symbol).copied())
    }
}

pub struct SimBilling {
    customers: Mutex<HashMap<String, CustomerInfo>>,
    fail_next: Mutex<Option<String>>,
    fulfilled: Mutex<Vec<FulfillmentRequest>>,
    calls: AtomicUsize,
    next_ref: AtomicUsize,
}

impl SimBilling {
    pub fn new() -> Self {
        Self {
            customers: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(None),
            fulfilled: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            next_ref: AtomicUsize::new(0),
        }
    }

    pub async fn register_customer(&self, recipient: &str, info: CustomerInfo) {
        self.customers
            .lock()
            .await
            .insert(recipient.to_string(), info);
    }

    pub async fn fail_next_order(&self, reason: &str) {
        *self.fail_next.lock().await = Some(reason.to_string());
    }

    /// Successfully delivered orders.
    pub async fn fulfillments(&self) -> Vec<FulfillmentRequest> {
        self.fulfilled.lock().await.clone()
    }

    /// Total `fulfill_order` invocations, successes and failures alike.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for SimBilling {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingProvider for SimBilling {
    async fn verify_customer(
        &self,
        service: ServiceKind,
        _biller_code: &str,
        recipient: &str,
        _subtype: Option<&str>,
    ) -> Result<CustomerInfo> {
        tokio::task::yield_now().await;
        self.customers
            .lock()
            .await
            .get(recipient)
            .cloned()
            .ok_or_else(|| {
                PurchaseError::Provider(format!("no {service} customer record for {recipient}"))
            })
    }

    async fn fulfill_order(&self, request: FulfillmentRequest) -> Result<FulfillmentReceipt> {
        tokio::task::yield_now().await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_next.lock().await.take() {
            return Err(PurchaseError::Provider(reason));
        }
        self.fulfilled.lock().await.push(request);
        let n = self.next_ref.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FulfillmentReceipt {
            provider_ref: format!("prov-{n:06}"),
        })
    }
}

/// The value a native payment carries, for assertions against the submitted
/// log.
pub fn native_value(spec: &TxSpec) -> Option<U256> {
    match spec {
        TxSpec::Payment {
            asset: AssetPayload::Native { value },
            ..
        } => Some(*value),
        _ => None,
    }
}
