//! Static contract metadata keyed by symbol.
//!
//! Specs are upserted before or during a replay. A symbol with no spec still
//! trades: it gets a multiplier of 1, premium-style cash settlement, and no
//! expiry settlement.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::data::OptionType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractError {
    #[error("Contract symbol is empty")]
    EmptySymbol,

    #[error("Invalid multiplier for {symbol}: {multiplier}")]
    InvalidMultiplier { symbol: String, multiplier: Decimal },

    #[error("Negative strike for {symbol}: {strike}")]
    NegativeStrike { symbol: String, strike: Decimal },
}

/// What kind of instrument a symbol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContractKind {
    Option { right: OptionType, strike: Decimal },
    Future,
}

/// How trade value reaches the cash balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStyle {
    /// Full premium changes hands at fill time (options).
    Premium,
    /// Only fees at fill time; PnL is posted as daily variation margin (futures).
    VariationMargin,
}

/// Immutable description of one tradable contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub symbol: String,
    pub underlying: String,
    #[serde(flatten)]
    pub kind: ContractKind,
    pub expiry: NaiveDate,
    pub multiplier: Decimal,
}

impl ContractSpec {
    pub fn option(
        symbol: &str,
        underlying: &str,
        right: OptionType,
        strike: Decimal,
        expiry: NaiveDate,
        multiplier: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            underlying: underlying.to_string(),
            kind: ContractKind::Option { right, strike },
            expiry,
            multiplier,
        }
    }

    pub fn future(symbol: &str, underlying: &str, expiry: NaiveDate, multiplier: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            underlying: underlying.to_string(),
            kind: ContractKind::Future,
            expiry,
            multiplier,
        }
    }

    pub fn settlement_style(&self) -> SettlementStyle {
        match self.kind {
            ContractKind::Option { .. } => SettlementStyle::Premium,
            ContractKind::Future => SettlementStyle::VariationMargin,
        }
    }

    pub fn expires_on(&self, date: NaiveDate) -> bool {
        self.expiry == date
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if self.symbol.trim().is_empty() {
            return Err(ContractError::EmptySymbol);
        }
        if self.multiplier <= Decimal::ZERO {
            return Err(ContractError::InvalidMultiplier {
                symbol: self.symbol.clone(),
                multiplier: self.multiplier,
            });
        }
        if let ContractKind::Option { strike, .. } = self.kind {
            if strike < Decimal::ZERO {
                return Err(ContractError::NegativeStrike {
                    symbol: self.symbol.clone(),
                    strike,
                });
            }
        }
        Ok(())
    }
}

/// Contract specs owned by one engine instance.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    specs: HashMap<String, ContractSpec>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a spec. Returns the spec it replaced, if any.
    pub fn upsert(&mut self, spec: ContractSpec) -> Result<Option<ContractSpec>, ContractError> {
        spec.validate()?;
        debug!(symbol = %spec.symbol, expiry = %spec.expiry, "contract upserted");
        Ok(self.specs.insert(spec.symbol.clone(), spec))
    }

    pub fn get(&self, symbol: &str) -> Option<&ContractSpec> {
        self.specs.get(symbol)
    }

    /// Contract multiplier, or 1 when the symbol has no spec.
    pub fn multiplier(&self, symbol: &str) -> Decimal {
        self.specs
            .get(symbol)
            .map(|s| s.multiplier)
            .unwrap_or(Decimal::ONE)
    }

    /// Settlement style, premium when the symbol has no spec.
    pub fn settlement_style(&self, symbol: &str) -> SettlementStyle {
        self.specs
            .get(symbol)
            .map(|s| s.settlement_style())
            .unwrap_or(SettlementStyle::Premium)
    }

    /// Specs whose expiry falls on `date`.
    pub fn expiring_on(&self, date: NaiveDate) -> impl Iterator<Item = &ContractSpec> {
        self.specs.values().filter(move |s| s.expires_on(date))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
