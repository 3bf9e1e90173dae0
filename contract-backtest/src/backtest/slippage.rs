//! Slippage applied to taker fills.
//!
//! Market and stop fills trade at whatever the bar offers, so they pay an
//! adverse adjustment: buys fill higher, sells lower. Limit-bounded fills
//! (limit, stop-limit) never trade through their limit and are left as
//! matched.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orders::{OrderKind, OrderSide};

const BPS_DENOMINATOR: i64 = 10_000;

/// Configurable slippage model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlippageModel {
    /// Proportional slippage in basis points of the matched price.
    pub bps: Decimal,
    /// Fixed price offset per fill.
    pub fixed: Decimal,
}

impl SlippageModel {
    pub fn bps(bps: Decimal) -> Self {
        Self {
            bps,
            fixed: Decimal::ZERO,
        }
    }

    /// Create a zero-slippage model (fills at the matched price).
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.bps.is_zero() && self.fixed.is_zero()
    }

    /// Whether fills of `kind` pay slippage.
    pub fn applies_to(kind: OrderKind) -> bool {
        matches!(kind, OrderKind::Market | OrderKind::Stop { .. })
    }

    /// Adjust a matched price against the taker. Never returns a negative price.
    pub fn adjust(&self, side: OrderSide, price: Decimal) -> Decimal {
        let offset = price * self.bps / Decimal::from(BPS_DENOMINATOR) + self.fixed;
        let adjusted = match side {
            OrderSide::Buy => price + offset,
            OrderSide::Sell => price - offset,
        };
        adjusted.max(Decimal::ZERO)
    }
}
