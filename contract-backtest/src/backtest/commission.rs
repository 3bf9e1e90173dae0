//! Commission model for contract fills.
//!
//! Default: $1.00 per contract, no notional fee, no min/max.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const BPS_DENOMINATOR: i64 = 10_000;

/// Commission charged on a single fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commission {
    pub contracts: i64,
    pub notional: Decimal,
    pub total: Decimal,
}

/// Configurable commission model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionModel {
    /// Commission per contract.
    pub per_contract: Decimal,
    /// Fee on traded notional, in basis points.
    pub fee_bps: Decimal,
    /// Minimum commission per fill.
    pub min_per_order: Decimal,
    /// Maximum commission per fill (0 = unlimited).
    pub max_per_order: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            per_contract: Decimal::ONE,
            fee_bps: Decimal::ZERO,
            min_per_order: Decimal::ZERO,
            max_per_order: Decimal::ZERO,
        }
    }
}

impl CommissionModel {
    pub fn new(per_contract: Decimal) -> Self {
        Self {
            per_contract,
            ..Default::default()
        }
    }

    /// Notional-only fee with no per-contract charge.
    pub fn bps(fee_bps: Decimal) -> Self {
        Self {
            per_contract: Decimal::ZERO,
            fee_bps,
            ..Default::default()
        }
    }

    pub fn zero() -> Self {
        Self {
            per_contract: Decimal::ZERO,
            fee_bps: Decimal::ZERO,
            min_per_order: Decimal::ZERO,
            max_per_order: Decimal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.per_contract.is_zero() && self.fee_bps.is_zero() && self.min_per_order.is_zero()
    }

    /// Commission for a fill of `contracts` with the given traded notional.
    pub fn calculate(&self, contracts: i64, notional: Decimal) -> Commission {
        let per_contract = self.per_contract * Decimal::from(contracts.abs());
        let on_notional = notional.abs() * self.fee_bps / Decimal::from(BPS_DENOMINATOR);
        let mut total = per_contract + on_notional;

        if total < self.min_per_order {
            total = self.min_per_order;
        }
        if self.max_per_order > Decimal::ZERO && total > self.max_per_order {
            total = self.max_per_order;
        }

        Commission {
            contracts,
            notional,
            total,
        }
    }
}
