use clap::Parser;
use miette::{IntoDiagnostic, Result};
use primitive_types::{H160, U256};
use rust_decimal_macros::dec;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use utilipay::application::orchestrator::{OrchestratorSettings, PurchaseOrchestrator};
use utilipay::domain::asset::{AssetDescriptor, AssetRegistry};
use utilipay::domain::flows::{ServiceKind, StandardValidator};
use utilipay::domain::order::{OrderIntent, OrderState};
use utilipay::domain::ports::{BillingProvider, CustomerInfo, NetworkId};
use utilipay::infrastructure::sim::{SimBilling, SimChain, SimRates, SimWallet};

/// Runs one utility purchase against the simulated wallet, chain and
/// billing provider, streaming each state transition to the terminal.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Order intent JSON file
    intent: PathBuf,

    /// Preset token allowance in base units on the simulated chain
    #[arg(long)]
    allowance: Option<u64>,

    /// The simulated wallet rejects the next signature prompt
    #[arg(long)]
    reject_signature: bool,

    /// The simulated billing provider fails after the payment confirms
    #[arg(long)]
    fail_fulfillment: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let file = File::open(&cli.intent).into_diagnostic()?;
    let intent: OrderIntent = serde_json::from_reader(file).into_diagnostic()?;

    let network = NetworkId(1);
    let payer = H160::repeat_byte(0x11);
    let order_contract = H160::repeat_byte(0x22);
    let token_contract = H160::repeat_byte(0x33);

    let registry = AssetRegistry::new([
        AssetDescriptor::native("ETH", 18),
        AssetDescriptor::token("USDT", 6, token_contract),
    ]);
    let wallet = Arc::new(SimWallet::new(payer, network));
    let chain = Arc::new(SimChain::new(payer));
    let rates = Arc::new(SimRates::new([("ETH", dec!(2000)), ("USDT", dec!(1))]));
    let billing = Arc::new(SimBilling::new());

    billing
        .register_customer(
            &intent.target.recipient,
            CustomerInfo {
                name: "DEMO CUSTOMER".into(),
                detail: None,
            },
        )
        .await;
    if let Some(allowance) = cli.allowance {
        chain
            .set_allowance(token_contract, payer, order_contract, U256::from(allowance))
            .await;
    }
    if cli.reject_signature {
        chain.reject_next_signature().await;
    }
    if cli.fail_fulfillment {
        billing.fail_next_order("provider unavailable (500)").await;
    }

    // Metered services resolve the customer before purchase, like the UI
    // does.
    if matches!(
        intent.target.service,
        ServiceKind::Electricity | ServiceKind::Tv
    ) {
        let info = billing
            .verify_customer(
                intent.target.service,
                &intent.target.biller_code,
                &intent.target.recipient,
                intent.target.subtype.as_deref(),
            )
            .await
            .into_diagnostic()?;
        println!("customer: {}", info.name);
    }

    let orchestrator = Arc::new(PurchaseOrchestrator::new(
        registry,
        OrchestratorSettings {
            network,
            order_contract,
            min_fiat: dec!(100),
        },
        wallet,
        chain,
        rates,
        billing,
        Arc::new(StandardValidator),
    ));

    let mut updates = orchestrator.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().clone();
            println!("state: {}", status.state);
        }
    });

    let result = orchestrator.purchase(intent).await;

    let status = orchestrator.current();
    match status.state {
        OrderState::FulfillmentSucceeded => {
            if let Some(request_id) = &status.request_id {
                println!("purchase complete: request {request_id}");
            }
        }
        OrderState::FulfillmentFailed => {
            if let Some(request_id) = &status.request_id {
                println!("fulfillment failed: contact support with request id {request_id}");
            }
        }
        _ => {
            if let Some(error) = &status.error {
                println!("attempt failed during {:?}: {}", error.stage, error.message);
            }
        }
    }
    orchestrator.dismiss();

    result.into_diagnostic()?;
    Ok(())
}
