//! Expiry settlement and futures variation margin.
//!
//! Options settle once, at expiry, for intrinsic value: the payout moves into
//! cash and is added to realized PnL as is, then the position is reset.
//! Futures post the change in settlement price every session and take a final
//! variation at expiry, closing their lots at the final price.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::contracts::{ContractKind, ContractRegistry, ContractSpec, SettlementStyle};
use crate::orders::OrderId;

use super::ledger::{AccountState, CashEntry, CashFlowKind};

/// Result of settling one expiring position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub symbol: String,
    pub date: NaiveDate,
    /// Signed quantity held before settlement.
    pub quantity: i64,
    /// Final price: intrinsic value for options, settlement price for futures.
    pub settle_price: Decimal,
    /// Underlying price used, `None` when it was not supplied.
    pub underlying_price: Option<Decimal>,
    pub cash_amount: Decimal,
    pub realized_pnl: Decimal,
}

/// Cash owed for marking `symbol`'s open quantity from its last settle mark
/// to `price`. `None` when the position is flat or unknown.
fn variation_amount(account: &AccountState, symbol: &str, price: Decimal, multiplier: Decimal) -> Option<Decimal> {
    let position = account.position(symbol).filter(|p| !p.is_flat())?;
    let basis = position.settle_mark.unwrap_or(position.avg_price);
    Some((price - basis) * multiplier * Decimal::from(position.quantity))
}

/// Mark a variation-margin position to `price`, posting the difference as
/// cash. Zero moves update the mark without a journal entry.
pub(crate) fn mark_to_price(
    account: &mut AccountState,
    symbol: &str,
    price: Decimal,
    multiplier: Decimal,
    date: NaiveDate,
    order_id: Option<OrderId>,
) -> Option<CashEntry> {
    let amount = variation_amount(account, symbol, price, multiplier)?;
    account.position_mut(symbol).settle_mark = Some(price);
    if amount.is_zero() {
        return None;
    }

    let mut entry = CashEntry::new(CashFlowKind::VariationMargin, amount)
        .on(date)
        .for_symbol(symbol);
    entry.order_id = order_id;
    account.post(entry.clone());
    Some(entry)
}

/// Post daily variation margin for every open futures position with a
/// settlement price in `settles`.
pub fn post_variation_margin(
    account: &mut AccountState,
    contracts: &ContractRegistry,
    date: NaiveDate,
    settles: &HashMap<String, Decimal>,
) -> Vec<CashEntry> {
    let symbols: Vec<String> = account
        .open_positions()
        .filter(|p| contracts.settlement_style(&p.symbol) == SettlementStyle::VariationMargin)
        .map(|p| p.symbol.clone())
        .collect();

    symbols
        .iter()
        .filter_map(|symbol| {
            let settle = *settles.get(symbol)?;
            let multiplier = contracts.multiplier(symbol);
            mark_to_price(account, symbol, settle, multiplier, date, None)
        })
        .collect()
}

/// Settle and flatten every open position whose contract expires on `date`.
///
/// `underlying_prices` is keyed by underlying symbol. An option whose
/// underlying price is missing expires worthless; a future falls back to its
/// last settle mark.
pub fn settle_expiries(
    account: &mut AccountState,
    contracts: &ContractRegistry,
    date: NaiveDate,
    underlying_prices: &HashMap<String, Decimal>,
) -> Vec<Settlement> {
    let mut expiring: Vec<&ContractSpec> = contracts
        .expiring_on(date)
        .filter(|spec| account.net_quantity(&spec.symbol) != 0)
        .collect();
    expiring.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    expiring
        .into_iter()
        .map(|spec| {
            let spot = underlying_prices.get(&spec.underlying).copied();
            match spec.kind {
                ContractKind::Option { right, strike } => {
                    let intrinsic = match spot {
                        Some(spot) => right.intrinsic(spot, strike),
                        None => {
                            warn!(
                                symbol = %spec.symbol,
                                underlying = %spec.underlying,
                                "no underlying price at expiry, settling worthless"
                            );
                            Decimal::ZERO
                        }
                    };
                    settle_option(account, spec, date, intrinsic, spot)
                }
                ContractKind::Future => settle_future(account, spec, date, spot),
            }
        })
        .collect()
}

fn settle_option(
    account: &mut AccountState,
    spec: &ContractSpec,
    date: NaiveDate,
    intrinsic: Decimal,
    spot: Option<Decimal>,
) -> Settlement {
    let quantity = account.net_quantity(&spec.symbol);
    let payout = intrinsic * spec.multiplier * Decimal::from(quantity);

    account.post(
        CashEntry::new(CashFlowKind::ExpirySettlement, payout)
            .on(date)
            .for_symbol(&spec.symbol),
    );
    // Payout is realized whole, independent of entry premium.
    account.close_out(&spec.symbol, payout);

    info!(
        symbol = %spec.symbol,
        quantity,
        intrinsic = %intrinsic,
        payout = %payout,
        "option expired"
    );

    Settlement {
        symbol: spec.symbol.clone(),
        date,
        quantity,
        settle_price: intrinsic,
        underlying_price: spot,
        cash_amount: payout,
        realized_pnl: payout,
    }
}

fn settle_future(
    account: &mut AccountState,
    spec: &ContractSpec,
    date: NaiveDate,
    spot: Option<Decimal>,
) -> Settlement {
    let quantity = account.net_quantity(&spec.symbol);
    let final_price = match spot {
        Some(price) => price,
        None => {
            let fallback = account
                .position(&spec.symbol)
                .and_then(|p| p.settle_mark.or(Some(p.avg_price)))
                .unwrap_or(Decimal::ZERO);
            warn!(
                symbol = %spec.symbol,
                fallback = %fallback,
                "no final settlement price at expiry, using last settle mark"
            );
            fallback
        }
    };

    let amount = variation_amount(account, &spec.symbol, final_price, spec.multiplier)
        .unwrap_or(Decimal::ZERO);
    account.post(
        CashEntry::new(CashFlowKind::ExpirySettlement, amount)
            .on(date)
            .for_symbol(&spec.symbol),
    );
    let realized = account.book_trade(&spec.symbol, -quantity, final_price, date, spec.multiplier);

    info!(
        symbol = %spec.symbol,
        quantity,
        final_price = %final_price,
        amount = %amount,
        "future expired"
    );

    Settlement {
        symbol: spec.symbol.clone(),
        date,
        quantity,
        settle_price: final_price,
        underlying_price: spot,
        cash_amount: amount,
        realized_pnl: realized,
    }
}
