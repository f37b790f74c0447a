use crate::error::{PurchaseError, Result};
use primitive_types::{H160, U256};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Native,
    FungibleToken,
}

/// Static description of a payable asset.
///
/// Native assets never carry a contract address; fungible tokens always do.
/// The constructors are the only way to build one, so the invariant holds by
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetDescriptor {
    pub symbol: String,
    pub decimals: u32,
    pub kind: AssetKind,
    contract_address: Option<H160>,
}

impl AssetDescriptor {
    pub fn native(symbol: &str, decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            kind: AssetKind::Native,
            contract_address: None,
        }
    }

    pub fn token(symbol: &str, decimals: u32, contract_address: H160) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            kind: AssetKind::FungibleToken,
            contract_address: Some(contract_address),
        }
    }

    /// The token contract address. Calling this on a native asset is a
    /// programming error and fails instead of silently succeeding.
    pub fn token_address(&self) -> Result<H160> {
        self.contract_address.ok_or_else(|| {
            PurchaseError::Validation(format!(
                "{} is a native asset and has no token contract",
                self.symbol
            ))
        })
    }

    /// Converts a decimal amount into on-chain base units.
    pub fn to_base_units(&self, amount: Decimal) -> Result<U256> {
        if amount <= Decimal::ZERO {
            return Err(PurchaseError::Validation(format!(
                "amount must be positive, got {amount}"
            )));
        }
        if self.decimals > 18 {
            return Err(PurchaseError::Validation(format!(
                "{} uses {} decimals, more than the supported 18",
                self.symbol, self.decimals
            )));
        }
        let scale = Decimal::from(10u64.pow(self.decimals));
        let scaled = amount.checked_mul(scale).ok_or_else(|| {
            PurchaseError::Validation(format!("amount {amount} overflows {}", self.symbol))
        })?;
        let units = scaled.trunc().to_u128().ok_or_else(|| {
            PurchaseError::Validation(format!("amount {amount} overflows {}", self.symbol))
        })?;
        Ok(U256::from(units))
    }
}

/// Lookup table for the assets a deployment accepts. Fails closed: unknown
/// symbols never reach the downstream components.
pub struct AssetRegistry {
    assets: HashMap<String, AssetDescriptor>,
}

impl AssetRegistry {
    pub fn new(assets: impl IntoIterator<Item = AssetDescriptor>) -> Self {
        Self {
            assets: assets
                .into_iter()
                .map(|asset| (asset.symbol.clone(), asset))
                .collect(),
        }
    }

    pub fn describe(&self, symbol: &str) -> Result<&AssetDescriptor> {
        self.assets
            .get(symbol)
            .ok_or_else(|| PurchaseError::UnknownAsset(symbol.to_string()))
    }
}
