//! Read-only valuation of an account at a set of marks.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::contracts::{ContractRegistry, SettlementStyle};

use super::ledger::{AccountState, Position};

/// Where a position's mark came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkSource {
    /// Supplied by the caller for this snapshot.
    Supplied,
    /// Last bar the engine processed for the symbol.
    LastBar,
    /// No price known; valued at its own average price.
    AvgPrice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub mark: Decimal,
    pub mark_source: MarkSource,
    pub multiplier: Decimal,
    /// (mark - avg) * multiplier * quantity.
    pub unrealized_pnl: Decimal,
    /// |quantity| * mark * multiplier.
    pub exposure: Decimal,
    /// Cash the position would return if closed at the mark. Informational;
    /// equity is built from unrealized PnL.
    pub liquidation_value: Decimal,
    pub realized_pnl: Decimal,
}

/// Point-in-time account valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub cash: Decimal,
    /// Cash plus total unrealized PnL.
    pub equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub gross_exposure: Decimal,
    pub positions: Vec<PositionSnapshot>,
}

impl Snapshot {
    pub fn position(&self, symbol: &str) -> Option<&PositionSnapshot> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Value every open position in `account`.
///
/// `mark_for` returns the mark for a symbol and where it came from; symbols it
/// cannot price are valued at their average price.
pub fn value_account<F>(
    account: &AccountState,
    contracts: &ContractRegistry,
    date: NaiveDate,
    mark_for: F,
) -> Snapshot
where
    F: Fn(&str) -> Option<(Decimal, MarkSource)>,
{
    let positions: Vec<PositionSnapshot> = account
        .open_positions()
        .map(|p| {
            let (mark, source) = mark_for(&p.symbol).unwrap_or((p.avg_price, MarkSource::AvgPrice));
            value_position(p, contracts, mark, source)
        })
        .collect();

    let unrealized_pnl: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
    let gross_exposure = positions.iter().map(|p| p.exposure).sum();

    Snapshot {
        date,
        cash: account.cash,
        equity: account.cash + unrealized_pnl,
        unrealized_pnl,
        realized_pnl: account.realized_pnl,
        gross_exposure,
        positions,
    }
}

fn value_position(
    position: &Position,
    contracts: &ContractRegistry,
    mark: Decimal,
    mark_source: MarkSource,
) -> PositionSnapshot {
    let multiplier = contracts.multiplier(&position.symbol);
    let quantity = Decimal::from(position.quantity);

    // Premium contracts paid their cost in cash; futures already hold
    // variation through the last settle mark.
    let liquidation_value = match contracts.settlement_style(&position.symbol) {
        SettlementStyle::Premium => mark * multiplier * quantity,
        SettlementStyle::VariationMargin => {
            let basis = position.settle_mark.unwrap_or(position.avg_price);
            (mark - basis) * multiplier * quantity
        }
    };

    PositionSnapshot {
        symbol: position.symbol.clone(),
        quantity: position.quantity,
        avg_price: position.avg_price,
        mark,
        mark_source,
        multiplier,
        unrealized_pnl: position.unrealized_pnl(mark, multiplier),
        exposure: quantity.abs() * mark * multiplier,
        liquidation_value,
        realized_pnl: position.realized_pnl,
    }
}
