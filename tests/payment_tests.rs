mod common;

use common::*;
use primitive_types::U256;
use rust_decimal_macros::dec;
use utilipay::domain::order::OrderState;
use utilipay::domain::ports::{AssetPayload, TxSpec};
use utilipay::error::{PurchaseError, Stage};

#[tokio::test]
async fn test_payment_carries_the_request_token() {
    let rig = rig();
    rig.orchestrator.purchase(native_intent(dec!(1000))).await.unwrap();

    let request_id = rig.orchestrator.current().request_id.unwrap();
    let submitted = rig.chain.submitted().await;
    match &submitted[0] {
        TxSpec::Payment { request_token, .. } => {
            // The on-chain token is the deterministic encoding of the id the
            // billing provider sees.
            assert_eq!(*request_token, request_id.as_token());
        }
        other => panic!("expected a payment, got {other:?}"),
    }
}

#[tokio::test]
async fn test_native_payment_attaches_value() {
    let rig = rig();
    rig.orchestrator.purchase(native_intent(dec!(1000))).await.unwrap();

    let submitted = rig.chain.submitted().await;
    assert!(matches!(
        submitted[0],
        TxSpec::Payment {
            to,
            asset: AssetPayload::Native { value },
            ..
        } if to == order_contract() && value == U256::from(500_000_000_000_000_000u128)
    ));
}

#[tokio::test]
async fn test_token_payment_sends_amount_not_value() {
    let rig = rig();
    rig.chain
        .set_allowance(token_contract(), payer(), order_contract(), U256::from(50_000_000u64))
        .await;
    rig.orchestrator.purchase(token_intent(dec!(50))).await.unwrap();

    let submitted = rig.chain.submitted().await;
    assert!(matches!(
        submitted[0],
        TxSpec::Payment {
            asset: AssetPayload::Token { token, amount },
            ..
        } if token == token_contract() && amount == U256::from(50_000_000u64)
    ));
}

#[tokio::test]
async fn test_simulation_failure_is_a_payment_failure() {
    let rig = rig();
    rig.chain.fail_next_simulation("gas estimation failed").await;

    let result = rig.orchestrator.purchase(native_intent(dec!(1000))).await;
    assert!(matches!(result, Err(PurchaseError::SimulationFailed(_))));

    let status = rig.orchestrator.current();
    assert_eq!(status.state, OrderState::PaymentFailed);
    let error = status.error.unwrap();
    assert_eq!(error.stage, Stage::Payment);
    assert!(error.message.contains("gas estimation failed"));
    // Nothing was broadcast.
    assert!(rig.chain.submitted().await.is_empty());
}

#[tokio::test]
async fn test_revert_is_a_payment_failure_with_no_fulfillment() {
    let rig = rig();
    rig.chain.revert_next("transfer failed").await;

    let result = rig.orchestrator.purchase(native_intent(dec!(1000))).await;
    assert!(matches!(result, Err(PurchaseError::Reverted(_))));

    let status = rig.orchestrator.current();
    assert_eq!(status.state, OrderState::PaymentFailed);
    assert!(status.payment_tx.is_some(), "the broadcast hash is kept for debugging");
    assert_eq!(rig.billing.calls(), 0);
}

#[tokio::test]
async fn test_confirmed_and_failed_are_mutually_exclusive() {
    // A confirmed payment must land in PaymentConfirmed territory, never in
    // an error state, even when fulfillment later fails.
    let rig = rig();
    rig.billing.fail_next_order("boom").await;

    let _ = rig.orchestrator.purchase(native_intent(dec!(1000))).await;
    let status = rig.orchestrator.current();
    assert_eq!(status.state, OrderState::FulfillmentFailed);
    assert_eq!(status.error.unwrap().stage, Stage::Fulfillment);
    assert_eq!(rig.chain.confirmed_count().await, 1);
}
