use crate::application::orchestrator::Attempt;
use crate::domain::asset::AssetKind;
use crate::domain::order::{Order, OrderState, RequestId, TxRef};
use crate::domain::ports::{Address, AssetPayload, ChainRef, ReceiptStatus, TxSpec};
use crate::error::{PurchaseError, Result, Stage};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::info;

/// Builds and submits the transaction that both transfers value and records
/// the order on-chain, then awaits one confirmation.
///
/// For token assets the caller must already hold a `Sufficient` answer from
/// the allowance gate; this component does not re-check. A request id that
/// confirmed a payment once is refused forever after, so a failed attempt
/// resubmits under a fresh id and there is never ambiguity about which
/// attempt a confirmed transaction belongs to.
pub struct PaymentSubmitter {
    chain: ChainRef,
    confirmed: Mutex<HashSet<RequestId>>,
}

impl PaymentSubmitter {
    pub fn new(chain: ChainRef) -> Self {
        Self {
            chain,
            confirmed: Mutex::new(HashSet::new()),
        }
    }

    pub async fn submit_payment(
        &self,
        attempt: &Attempt<'_>,
        order: &mut Order,
        to: Address,
    ) -> Result<TxRef> {
        match self.run(attempt, order, to).await {
            Ok(tx_ref) => Ok(tx_ref),
            Err(error) => {
                order.fail(Stage::Payment, &error);
                attempt.publish(order);
                Err(error)
            }
        }
    }

    async fn run(&self, attempt: &Attempt<'_>, order: &mut Order, to: Address) -> Result<TxRef> {
        if self.confirmed.lock().await.contains(&order.request_id) {
            return Err(PurchaseError::Validation(format!(
                "request {} already has a confirmed payment",
                order.request_id
            )));
        }

        // Rejects non-positive amounts as a side effect.
        let amount = order.asset.to_base_units(order.crypto_amount)?;
        let asset = match order.asset.kind {
            AssetKind::Native => AssetPayload::Native { value: amount },
            AssetKind::FungibleToken => AssetPayload::Token {
                token: order.asset.token_address()?,
                amount,
            },
        };
        let spec = TxSpec::Payment {
            to,
            request_token: order.request_id.as_token(),
            asset,
        };

        order.transition(OrderState::AwaitingPaymentSignature);
        attempt.publish(order);
        let handle = self.chain.submit_transaction(spec).await?;
        let tx_ref = TxRef::new(handle.0);
        order.payment_tx = Some(tx_ref.clone());
        order.transition(OrderState::PaymentSubmitted);
        attempt.publish(order);

        let receipt = self.chain.await_receipt(handle).await?;
        match receipt.status {
            ReceiptStatus::Success => {
                self.confirmed.lock().await.insert(order.request_id.clone());
                info!(request_id = %order.request_id, tx = ?tx_ref.hash, "payment confirmed");
                order.transition(OrderState::PaymentConfirmed);
                attempt.publish(order);
                Ok(tx_ref)
            }
            ReceiptStatus::Reverted(reason) => Err(PurchaseError::Reverted(reason)),
        }
    }
}
