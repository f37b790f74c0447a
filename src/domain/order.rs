use crate::domain::asset::AssetDescriptor;
use crate::domain::flows::ServiceTarget;
use crate::domain::ports::TxHash;
use crate::error::{PurchaseError, Stage, StageError};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Client-generated idempotency key correlating one purchase attempt across
/// the chain and the billing provider. Fresh per attempt; never reused once
/// a payment has confirmed under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    pub fn fresh() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().r#gen();
        Self(hex::encode(bytes))
    }

    /// Deterministic fixed-width token carried in the payment transaction,
    /// so the chain and the provider agree on which attempt a transaction
    /// belongs to.
    pub fn as_token(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a transaction this orchestrator broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxRef {
    pub hash: TxHash,
    pub submitted_at: DateTime<Utc>,
}

impl TxRef {
    pub fn new(hash: TxHash) -> Self {
        Self {
            hash,
            submitted_at: Utc::now(),
        }
    }
}

/// Where a purchase attempt currently stands. One tagged value instead of a
/// pile of progress booleans; the UI renders exactly this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderState {
    Idle,
    Validating,
    AwaitingApprovalSignature,
    ApprovalSubmitted,
    ApprovalConfirmed,
    ApprovalFailed,
    AwaitingPaymentSignature,
    PaymentSubmitted,
    PaymentConfirmed,
    PaymentFailed,
    FulfillmentPending,
    FulfillmentSucceeded,
    FulfillmentFailed,
}

impl OrderState {
    /// Terminal for the current attempt; only dismissal leaves these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::ApprovalFailed
                | OrderState::PaymentFailed
                | OrderState::FulfillmentSucceeded
                | OrderState::FulfillmentFailed
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// User input for one purchase, as collected by the form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderIntent {
    pub asset: String,
    pub fiat_amount: Decimal,
    pub target: ServiceTarget,
}

/// The unit of work: exactly one is live per orchestrator at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub request_id: RequestId,
    pub asset: AssetDescriptor,
    pub fiat_amount: Decimal,
    pub crypto_amount: Decimal,
    pub target: ServiceTarget,
    pub state: OrderState,
    pub approval_tx: Option<TxRef>,
    pub payment_tx: Option<TxRef>,
    pub last_error: Option<StageError>,
}

impl Order {
    pub fn new(
        asset: AssetDescriptor,
        fiat_amount: Decimal,
        crypto_amount: Decimal,
        target: ServiceTarget,
    ) -> Self {
        Self {
            request_id: RequestId::fresh(),
            asset,
            fiat_amount,
            crypto_amount,
            target,
            state: OrderState::Validating,
            approval_tx: None,
            payment_tx: None,
            last_error: None,
        }
    }

    pub fn transition(&mut self, state: OrderState) {
        self.state = state;
    }

    /// Moves to the failed state matching the stage and records the error.
    /// Prerequisite failures normally abort before an order exists; if one
    /// lands here anyway it shows as Idle, not as a post-payment failure.
    pub fn fail(&mut self, stage: Stage, error: &PurchaseError) {
        self.state = match stage {
            Stage::Prerequisite => OrderState::Idle,
            Stage::Authorization => OrderState::ApprovalFailed,
            Stage::Payment => OrderState::PaymentFailed,
            Stage::Fulfillment => OrderState::FulfillmentFailed,
        };
        self.last_error = Some(StageError::new(stage, error));
    }

    pub fn snapshot(&self) -> PurchaseStatus {
        PurchaseStatus {
            state: self.state,
            request_id: Some(self.request_id.clone()),
            approval_tx: self.approval_tx.clone(),
            payment_tx: self.payment_tx.clone(),
            error: self.last_error.clone(),
        }
    }
}

/// What the UI observes: pushed on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseStatus {
    pub state: OrderState,
    pub request_id: Option<RequestId>,
    pub approval_tx: Option<TxRef>,
    pub payment_tx: Option<TxRef>,
    pub error: Option<StageError>,
}

impl PurchaseStatus {
    pub fn idle() -> Self {
        Self {
            state: OrderState::Idle,
            request_id: None,
            approval_tx: None,
            payment_tx: None,
            error: None,
        }
    }

    pub fn validating() -> Self {
        Self {
            state: OrderState::Validating,
            ..Self::idle()
        }
    }

    /// Idle with the error that aborted the attempt before it started.
    pub fn aborted(error: StageError) -> Self {
        Self {
            error: Some(error),
            ..Self::idle()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flows::ServiceKind;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new(
            AssetDescriptor::native("ETH", 18),
            dec!(1000),
            dec!(0.5),
            ServiceTarget {
                service: ServiceKind::Airtime,
                biller_code: "mtn".into(),
                variation_code: None,
                recipient: "08012345678".into(),
                subtype: None,
            },
        )
    }

    #[test]
    fn test_request_token_is_deterministic() {
        let id = RequestId::fresh();
        assert_eq!(id.as_token(), id.as_token());
    }

    #[test]
    fn test_distinct_ids_have_distinct_tokens() {
        let a = RequestId::fresh();
        let b = RequestId::fresh();
        assert_ne!(a, b);
        assert_ne!(a.as_token(), b.as_token());
    }

    #[test]
    fn test_fail_maps_stage_to_state() {
        let mut o = order();
        o.fail(Stage::Payment, &PurchaseError::SignatureRejected);
        assert_eq!(o.state, OrderState::PaymentFailed);
        let err = o.last_error.as_ref().unwrap();
        assert_eq!(err.stage, Stage::Payment);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_fail_never_disguises_a_prerequisite_as_post_payment() {
        let mut o = order();
        o.fail(Stage::Prerequisite, &PurchaseError::WalletNotReady);
        assert_eq!(o.state, OrderState::Idle);
        assert_eq!(o.last_error.as_ref().unwrap().stage, Stage::Prerequisite);
    }

    #[test]
    fn test_snapshot_carries_request_id() {
        let o = order();
        let status = o.snapshot();
        assert_eq!(status.request_id.as_ref(), Some(&o.request_id));
        assert_eq!(status.state, OrderState::Validating);
    }

    #[test]
    fn test_terminal_states() {
        for state in [
            OrderState::ApprovalFailed,
            OrderState::PaymentFailed,
            OrderState::FulfillmentSucceeded,
            OrderState::FulfillmentFailed,
        ] {
            assert!(state.is_terminal());
        }
        assert!(!OrderState::Idle.is_terminal());
        assert!(!OrderState::PaymentConfirmed.is_terminal());
    }
}
