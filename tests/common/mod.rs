#![allow(dead_code)]

use primitive_types::H160;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use utilipay::application::orchestrator::{OrchestratorSettings, PurchaseOrchestrator};
use utilipay::domain::asset::{AssetDescriptor, AssetRegistry};
use utilipay::domain::flows::{ServiceKind, ServiceTarget, StandardValidator};
use utilipay::domain::order::{OrderIntent, OrderState};
use utilipay::domain::ports::NetworkId;
use utilipay::infrastructure::sim::{SimBilling, SimChain, SimRates, SimWallet};

pub const NETWORK: NetworkId = NetworkId(1);

pub fn payer() -> H160 {
    H160::repeat_byte(0x11)
}

pub fn order_contract() -> H160 {
    H160::repeat_byte(0x22)
}

pub fn token_contract() -> H160 {
    H160::repeat_byte(0x33)
}

pub struct TestRig {
    pub wallet: Arc<SimWallet>,
    pub chain: Arc<SimChain>,
    pub rates: Arc<SimRates>,
    pub billing: Arc<SimBilling>,
    pub orchestrator: Arc<PurchaseOrchestrator>,
}

/// Orchestrator wired to fresh simulated collaborators: native ETH at a
/// rate of 2000 fiat per unit, token UPT (6 decimals) at parity.
pub fn rig() -> TestRig {
    let registry = AssetRegistry::new([
        AssetDescriptor::native("ETH", 18),
        AssetDescriptor::token("UPT", 6, token_contract()),
    ]);
    let wallet = Arc::new(SimWallet::new(payer(), NETWORK));
    let chain = Arc::new(SimChain::new(payer()));
    let rates = Arc::new(SimRates::new([("ETH", dec!(2000)), ("UPT", dec!(1))]));
    let billing = Arc::new(SimBilling::new());
    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        registry,
        OrchestratorSettings {
            network: NETWORK,
            order_contract: order_contract(),
            min_fiat: dec!(10),
        },
        wallet.clone(),
        chain.clone(),
        rates.clone(),
        billing.clone(),
        Arc::new(StandardValidator),
    ));
    TestRig {
        wallet,
        chain,
        rates,
        billing,
        orchestrator,
    }
}

pub fn airtime_target() -> ServiceTarget {
    ServiceTarget {
        service: ServiceKind::Airtime,
        biller_code: "mtn-vtu".into(),
        variation_code: None,
        recipient: "08012345678".into(),
        subtype: None,
    }
}

pub fn native_intent(fiat: Decimal) -> OrderIntent {
    OrderIntent {
        asset: "ETH".into(),
        fiat_amount: fiat,
        target: airtime_target(),
    }
}

pub fn token_intent(fiat: Decimal) -> OrderIntent {
    OrderIntent {
        asset: "UPT".into(),
        fiat_amount: fiat,
        target: airtime_target(),
    }
}

/// Records every state the feed publishes. Runs on the same current-thread
/// runtime as the attempt, waking at each of the simulator's suspension
/// points.
pub fn record_states(
    orchestrator: &Arc<PurchaseOrchestrator>,
) -> (JoinHandle<()>, Arc<Mutex<Vec<OrderState>>>) {
    let mut updates = orchestrator.subscribe();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let handle = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().state;
            sink.lock().unwrap().push(state);
        }
    });
    (handle, log)
}

/// Waits until the simulated chain has seen `count` submissions.
pub async fn wait_for_submissions(chain: &SimChain, count: usize) {
    for _ in 0..1000 {
        if chain.submitted().await.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("chain never saw {count} submissions");
}
