use crate::domain::flows::{ServiceKind, ServiceTarget};
use crate::domain::order::RequestId;
use crate::error::Result;
use async_trait::async_trait;
use primitive_types::{H160, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type Address = H160;
pub type TxHash = H256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the purchase amount travels in the payment transaction: attached as
/// value for native assets, as a token amount (zero value) for fungible
/// tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetPayload {
    Native { value: U256 },
    Token { token: Address, amount: U256 },
}

/// A transaction the orchestrator asks the chain client to sign and
/// broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxSpec {
    Approval {
        token: Address,
        spender: Address,
        amount: U256,
    },
    Payment {
        to: Address,
        request_token: [u8; 32],
        asset: AssetPayload,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle(pub TxHash);

/// Derived progress booleans as a chain client reports them. Several can be
/// true at once while the underlying transaction moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxProgress {
    pub pending: bool,
    pub submitted: bool,
    pub confirming: bool,
    pub confirmed: bool,
    pub errored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Pending,
    Submitted,
    Confirming,
    Confirmed,
    Errored,
}

impl TxPhase {
    /// Collapses the progress flags into a single phase. The flags are not
    /// independent: a confirmed transaction may still report `confirming`
    /// from a stale poll, so the decision order is fixed
    /// (error > confirmed > confirming > submitted > pending) and must be
    /// re-evaluated on every update.
    pub fn classify(progress: TxProgress) -> Self {
        if progress.errored {
            TxPhase::Errored
        } else if progress.confirmed {
            TxPhase::Confirmed
        } else if progress.confirming {
            TxPhase::Confirming
        } else if progress.submitted {
            TxPhase::Submitted
        } else {
            TxPhase::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
}

/// Connected-wallet facade. Readiness and network are shared mutable state
/// (the user can switch accounts or networks at any time), so callers must
/// re-read them immediately before use.
#[async_trait]
pub trait WalletContext: Send + Sync {
    fn is_ready(&self) -> bool;
    fn address(&self) -> Option<Address>;
    fn current_network(&self) -> NetworkId;
    /// Asks the wallet to switch networks. `Ok(false)` means the user
    /// declined.
    async fn request_switch(&self, network: NetworkId) -> Result<bool>;
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fresh on-chain read of the amount `spender` may move on behalf of
    /// `owner`. Implementations must not cache across calls.
    async fn read_allowance(&self, token: Address, owner: Address, spender: Address)
    -> Result<U256>;
    /// Signs and broadcasts a transaction. Errors before broadcast are
    /// signature rejection or simulation failure.
    async fn submit_transaction(&self, spec: TxSpec) -> Result<TxHandle>;
    /// Suspends until the transaction is included. A revert comes back as a
    /// receipt, not an `Err`; `Err` is reserved for RPC-level failures.
    async fn await_receipt(&self, handle: TxHandle) -> Result<Receipt>;
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Fiat units per whole asset unit, or `None` when no quote is
    /// available.
    async fn rate(&self, symbol: &str) -> Result<Option<Decimal>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub detail: Option<String>,
}

/// Everything the billing provider needs to deliver the service, keyed by
/// the request id and backed by the confirmed payment transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FulfillmentRequest {
    pub request_id: RequestId,
    pub target: ServiceTarget,
    pub fiat_amount: Decimal,
    pub crypto_amount: Decimal,
    pub asset_symbol: String,
    pub payment_tx: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FulfillmentReceipt {
    pub provider_ref: String,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Resolves a recipient identifier (meter, smartcard, ...) to customer
    /// details before a purchase is allowed.
    async fn verify_customer(
        &self,
        service: ServiceKind,
        biller_code: &str,
        recipient: &str,
        subtype: Option<&str>,
    ) -> Result<CustomerInfo>;
    /// Instructs the provider to deliver the service. Non-success responses
    /// surface as `PurchaseError::Provider`.
    async fn fulfill_order(&self, request: FulfillmentRequest) -> Result<FulfillmentReceipt>;
}

pub type WalletRef = Arc<dyn WalletContext>;
pub type ChainRef = Arc<dyn ChainClient>;
pub type RateRef = Arc<dyn RateProvider>;
pub type BillingRef = Arc<dyn BillingProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_priority_error_wins() {
        // A stale poll can leave every flag set at once; the error must win.
        let progress = TxProgress {
            pending: true,
            submitted: true,
            confirming: true,
            confirmed: true,
            errored: true,
        };
        assert_eq!(TxPhase::classify(progress), TxPhase::Errored);
    }

    #[test]
    fn test_phase_priority_confirmed_beats_confirming() {
        let progress = TxProgress {
            pending: true,
            submitted: true,
            confirming: true,
            confirmed: true,
            errored: false,
        };
        assert_eq!(TxPhase::classify(progress), TxPhase::Confirmed);
    }

    #[test]
    fn test_phase_priority_ladder() {
        let mut progress = TxProgress::default();
        assert_eq!(TxPhase::classify(progress), TxPhase::Pending);
        progress.pending = true;
        assert_eq!(TxPhase::classify(progress), TxPhase::Pending);
        progress.submitted = true;
        assert_eq!(TxPhase::classify(progress), TxPhase::Submitted);
        progress.confirming = true;
        assert_eq!(TxPhase::classify(progress), TxPhase::Confirming);
        progress.confirmed = true;
        assert_eq!(TxPhase::classify(progress), TxPhase::Confirmed);
    }
}
