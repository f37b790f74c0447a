use crate::application::orchestrator::Attempt;
use crate::domain::order::{Order, OrderState, RequestId, TxRef};
use crate::domain::ports::{BillingRef, FulfillmentReceipt, FulfillmentRequest};
use crate::error::{PurchaseError, Result, Stage};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Hands the confirmed payment to the billing provider for delivery.
///
/// This is the weakest link in the purchase: the chain payment is already
/// irreversible, so a provider failure leaves funds moved and service
/// undelivered. The coordinator never retries on its own — the client cannot
/// know whether the provider partially processed the request — and instead
/// surfaces the request id as the reconciliation key for manual support.
pub struct FulfillmentCoordinator {
    billing: BillingRef,
    attempted: Mutex<HashSet<RequestId>>,
}

impl FulfillmentCoordinator {
    pub fn new(billing: BillingRef) -> Self {
        Self {
            billing,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    /// Invoked at most once per request id, and only after the payment has
    /// confirmed.
    pub async fn fulfill(
        &self,
        attempt: &Attempt<'_>,
        order: &mut Order,
        payment_tx: &TxRef,
    ) -> Result<FulfillmentReceipt> {
        match self.run(attempt, order, payment_tx).await {
            Ok(receipt) => Ok(receipt),
            Err(error) => {
                warn!(
                    request_id = %order.request_id,
                    %error,
                    "fulfillment failed after confirmed payment"
                );
                order.fail(Stage::Fulfillment, &error);
                attempt.publish(order);
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        attempt: &Attempt<'_>,
        order: &mut Order,
        payment_tx: &TxRef,
    ) -> Result<FulfillmentReceipt> {
        if order.state != OrderState::PaymentConfirmed {
            return Err(PurchaseError::Validation(format!(
                "fulfillment requires a confirmed payment, order is {}",
                order.state
            )));
        }
        if !self.attempted.lock().await.insert(order.request_id.clone()) {
            return Err(PurchaseError::Validation(format!(
                "fulfillment already attempted for request {}",
                order.request_id
            )));
        }

        order.transition(OrderState::FulfillmentPending);
        attempt.publish(order);

        let request = FulfillmentRequest {
            request_id: order.request_id.clone(),
            target: order.target.clone(),
            fiat_amount: order.fiat_amount,
            crypto_amount: order.crypto_amount,
            asset_symbol: order.asset.symbol.clone(),
            payment_tx: payment_tx.hash,
        };
        match self.billing.fulfill_order(request).await {
            Ok(receipt) => {
                info!(
                    request_id = %order.request_id,
                    provider_ref = %receipt.provider_ref,
                    "order fulfilled"
                );
                order.transition(OrderState::FulfillmentSucceeded);
                attempt.publish(order);
                Ok(receipt)
            }
            Err(error) => {
                let detail = match error {
                    PurchaseError::Provider(message) => message,
                    other => other.to_string(),
                };
                Err(PurchaseError::Provider(format!(
                    "{detail} (quote request id {} to support)",
                    order.request_id
                )))
            }
        }
    }
}
