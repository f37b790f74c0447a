use crate::application::orchestrator::Attempt;
use crate::domain::order::{Order, OrderState, TxRef};
use crate::domain::ports::{Address, ChainRef, ReceiptStatus, TxSpec};
use crate::error::{PurchaseError, Result, Stage};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum AllowanceOutcome {
    /// The spender is already authorized for at least the required amount;
    /// no transaction was submitted.
    Sufficient,
    /// An approval transaction was submitted and confirmed.
    Approved(TxRef),
}

/// Guarantees that, before a token payment is submitted, the order contract
/// is authorized to move the purchase amount.
///
/// Approvals are for the exact required amount, not the unlimited sentinel:
/// a compromised spender contract can then drain at most one purchase worth
/// of tokens, at the cost of one approval transaction per purchase.
pub struct AllowanceGate {
    chain: ChainRef,
}

impl AllowanceGate {
    pub fn new(chain: ChainRef) -> Self {
        Self { chain }
    }

    /// Runs the approval sub-sequence for a token order. Calling this with a
    /// native asset is a programming error and fails before touching the
    /// chain. At most one approval transaction is submitted per call, and
    /// the current allowance is read fresh every time — another tab or
    /// wallet action may have changed it since the last attempt.
    pub async fn ensure_allowance(
        &self,
        attempt: &Attempt<'_>,
        order: &mut Order,
        owner: Address,
        spender: Address,
    ) -> Result<AllowanceOutcome> {
        match self.run(attempt, order, owner, spender).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                order.fail(Stage::Authorization, &error);
                attempt.publish(order);
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        attempt: &Attempt<'_>,
        order: &mut Order,
        owner: Address,
        spender: Address,
    ) -> Result<AllowanceOutcome> {
        let token = order.asset.token_address()?;
        let required = order.asset.to_base_units(order.crypto_amount)?;
        let current = self.chain.read_allowance(token, owner, spender).await?;
        if current >= required {
            debug!(
                request_id = %order.request_id,
                %current,
                %required,
                "allowance sufficient, skipping approval"
            );
            return Ok(AllowanceOutcome::Sufficient);
        }

        order.transition(OrderState::AwaitingApprovalSignature);
        attempt.publish(order);
        let handle = self
            .chain
            .submit_transaction(TxSpec::Approval {
                token,
                spender,
                amount: required,
            })
            .await?;
        let tx_ref = TxRef::new(handle.0);
        order.approval_tx = Some(tx_ref.clone());
        order.transition(OrderState::ApprovalSubmitted);
        attempt.publish(order);

        let receipt = self.chain.await_receipt(handle).await?;
        match receipt.status {
            ReceiptStatus::Success => {
                info!(request_id = %order.request_id, tx = ?tx_ref.hash, "approval confirmed");
                order.transition(OrderState::ApprovalConfirmed);
                attempt.publish(order);
                Ok(AllowanceOutcome::Approved(tx_ref))
            }
            ReceiptStatus::Reverted(reason) => Err(PurchaseError::Reverted(reason)),
        }
    }
}
