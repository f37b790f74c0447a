use crate::domain::ports::NetworkId;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PurchaseError>;

/// The stage of a purchase attempt an error originated from.
///
/// Errors before the payment transaction (`Prerequisite`, `Authorization`,
/// `Payment`) leave no funds moved and can be retried freely. A `Fulfillment`
/// error means the on-chain payment already confirmed; the request id is the
/// reconciliation key for manual support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Prerequisite,
    Authorization,
    Payment,
    Fulfillment,
}

#[derive(Error, Debug)]
pub enum PurchaseError {
    #[error("unsupported asset: {0}")]
    UnknownAsset(String),
    #[error("wallet is not connected")]
    WalletNotReady,
    #[error("connected to network {actual}, expected {expected}")]
    WrongNetwork {
        expected: NetworkId,
        actual: NetworkId,
    },
    #[error("network switch rejected")]
    SwitchRejected,
    #[error("no exchange rate available for {0}")]
    RateUnavailable(String),
    #[error("invalid order: {0}")]
    Validation(String),
    #[error("signature request rejected")]
    SignatureRejected,
    #[error("transaction simulation failed: {0}")]
    SimulationFailed(String),
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("chain rpc error: {0}")]
    Rpc(String),
    #[error("billing provider error: {0}")]
    Provider(String),
    #[error("a purchase is already in flight")]
    Busy,
}

/// Error detail attached to a failed status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, error: &PurchaseError) -> Self {
        Self {
            stage,
            message: error.to_string(),
        }
    }
}
