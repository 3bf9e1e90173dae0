//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! initial_cash = "250000"
//! reduce_only_allow_cross_zero = false
//! max_participation = "0.10"
//! mark_field = "close"
//! enforce_buying_power = true
//!
//! [commission]
//! per_contract = "0.65"
//! ```

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backtest::commission::CommissionModel;
use crate::backtest::slippage::SlippageModel;
use crate::data::MarkField;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Starting cash, posted as the first journal entry.
    pub initial_cash: Decimal,

    /// Commission model.
    pub commission: CommissionModel,

    /// Slippage model for market and stop fills.
    pub slippage: SlippageModel,

    /// Let reduce-only orders trade their full remainder, possibly flipping
    /// the position, instead of stopping at flat.
    pub reduce_only_allow_cross_zero: bool,

    /// Largest share of a bar's volume one order may take. `None` = uncapped.
    pub max_participation: Option<Decimal>,

    /// Preferred bar field for valuation marks.
    pub mark_field: MarkField,

    /// Expire orders whose fill would cost more than the available cash
    /// (premium plus commission).
    pub enforce_buying_power: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(100_000),
            commission: CommissionModel::default(),
            slippage: SlippageModel::default(),
            reduce_only_allow_cross_zero: false,
            max_participation: None,
            mark_field: MarkField::default(),
            enforce_buying_power: false,
        }
    }
}

impl EngineConfig {
    /// No commission, no slippage, no participation cap.
    pub fn frictionless(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            commission: CommissionModel::zero(),
            slippage: SlippageModel::zero(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_cash < Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "initial_cash must be non-negative, got {}",
                self.initial_cash
            )));
        }

        let c = &self.commission;
        let non_negative = [
            ("commission.per_contract", c.per_contract),
            ("commission.fee_bps", c.fee_bps),
            ("commission.min_per_order", c.min_per_order),
            ("commission.max_per_order", c.max_per_order),
            ("slippage.bps", self.slippage.bps),
            ("slippage.fixed", self.slippage.fixed),
        ];
        if let Some((name, value)) = non_negative.iter().find(|(_, v)| *v < Decimal::ZERO) {
            return Err(ConfigError::Invalid(format!(
                "{} must be non-negative, got {}",
                name, value
            )));
        }

        if let Some(rate) = self.max_participation {
            if rate <= Decimal::ZERO || rate > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "max_participation must be in (0, 1], got {}",
                    rate
                )));
            }
        }
        Ok(())
    }
}
