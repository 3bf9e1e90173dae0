//! Lot ledger, positions and the account cash journal.
//!
//! Quantities are signed throughout: long positive, short negative. A
//! position is the FIFO list of its open lots; every other field is derived
//! from the lots after each booking.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orders::{OrderId, OrderSide};

/// Unconsumed slice of a position opened by one fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub opened_on: NaiveDate,
    pub side: OrderSide,
    /// Signed remaining quantity, never zero while the lot is held.
    pub quantity: i64,
    pub price: Decimal,
}

impl Lot {
    fn new(opened_on: NaiveDate, quantity: i64, price: Decimal) -> Self {
        let side = if quantity > 0 { OrderSide::Buy } else { OrderSide::Sell };
        Self {
            opened_on,
            side,
            quantity,
            price,
        }
    }
}

/// Net holding in one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed sum of lot quantities.
    pub quantity: i64,
    /// Quantity-weighted mean lot price; zero when flat.
    pub avg_price: Decimal,
    pub lots: VecDeque<Lot>,
    pub realized_pnl: Decimal,
    /// Price through which variation margin has been posted.
    pub settle_mark: Option<Decimal>,
}

impl Position {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: 0,
            avg_price: Decimal::ZERO,
            lots: VecDeque::new(),
            realized_pnl: Decimal::ZERO,
            settle_mark: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Book a signed trade of `signed_qty` at `price`.
    ///
    /// Same-direction trades append a lot. Opposing trades consume lots oldest
    /// first and any excess opens a reversal lot. Returns the PnL realized by
    /// the consumed lots.
    pub fn book(
        &mut self,
        signed_qty: i64,
        price: Decimal,
        date: NaiveDate,
        multiplier: Decimal,
    ) -> Decimal {
        assert!(signed_qty != 0, "zero-quantity booking for {}", self.symbol);

        let mut remaining = signed_qty;
        let mut realized = Decimal::ZERO;

        if self.quantity == 0 || self.quantity.signum() == signed_qty.signum() {
            self.lots.push_back(Lot::new(date, signed_qty, price));
            remaining = 0;
        }

        while remaining != 0 {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };
            let lot_sign = lot.quantity.signum();
            assert!(
                lot_sign == -remaining.signum(),
                "lot direction mismatch in {}",
                self.symbol
            );

            let closed = remaining.abs().min(lot.quantity.abs());
            // Long lots profit when exited above entry, short lots below.
            realized += (price - lot.price) * Decimal::from(lot_sign * closed) * multiplier;
            lot.quantity -= lot_sign * closed;
            remaining += lot_sign * closed;

            assert!(
                lot.quantity.signum() != -lot_sign,
                "lot over-consumed in {}",
                self.symbol
            );
            if lot.quantity == 0 {
                self.lots.pop_front();
            }
        }

        if remaining != 0 {
            self.lots.push_back(Lot::new(date, remaining, price));
        }

        self.realized_pnl += realized;
        self.recompute();
        realized
    }

    /// Drop every lot and credit `realized` directly, bypassing per-lot PnL.
    /// Used when a settlement amount replaces the trade PnL.
    pub(crate) fn close_out(&mut self, realized: Decimal) {
        self.lots.clear();
        self.realized_pnl += realized;
        self.recompute();
    }

    /// (mark - avg) * multiplier * signed quantity.
    pub fn unrealized_pnl(&self, mark: Decimal, multiplier: Decimal) -> Decimal {
        (mark - self.avg_price) * multiplier * Decimal::from(self.quantity)
    }

    /// Panics if the derived fields disagree with the lots.
    pub fn check_invariants(&self) {
        let lot_sum: i64 = self.lots.iter().map(|l| l.quantity).sum();
        assert_eq!(self.quantity, lot_sum, "lot sum drift in {}", self.symbol);
        assert!(
            self.lots.iter().all(|l| l.quantity != 0
                && l.quantity.signum() == self.quantity.signum()),
            "mixed-direction lots in {}",
            self.symbol
        );
        if self.quantity == 0 {
            assert!(self.avg_price.is_zero() && self.lots.is_empty());
        }
    }

    fn recompute(&mut self) {
        self.quantity = self.lots.iter().map(|l| l.quantity).sum();

        let abs_qty: i64 = self.lots.iter().map(|l| l.quantity.abs()).sum();
        self.avg_price = if abs_qty == 0 {
            Decimal::ZERO
        } else {
            let value: Decimal = self
                .lots
                .iter()
                .map(|l| l.price * Decimal::from(l.quantity.abs()))
                .sum();
            value / Decimal::from(abs_qty)
        };

        if self.quantity == 0 {
            self.settle_mark = None;
        }
        self.check_invariants();
    }
}

/// Source of a cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowKind {
    Deposit,
    Premium,
    Fee,
    ExpirySettlement,
    VariationMargin,
}

/// One line of the append-only cash journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashEntry {
    pub date: Option<NaiveDate>,
    pub kind: CashFlowKind,
    pub symbol: Option<String>,
    pub order_id: Option<OrderId>,
    pub amount: Decimal,
}

impl CashEntry {
    pub fn new(kind: CashFlowKind, amount: Decimal) -> Self {
        Self {
            date: None,
            kind,
            symbol: None,
            order_id: None,
            amount,
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn for_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn for_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

/// Cash, positions and realized PnL of one simulated book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub cash: Decimal,
    pub positions: BTreeMap<String, Position>,
    pub realized_pnl: Decimal,
    journal: Vec<CashEntry>,
}

impl AccountState {
    pub fn new(initial_cash: Decimal) -> Self {
        let mut account = Self {
            cash: Decimal::ZERO,
            positions: BTreeMap::new(),
            realized_pnl: Decimal::ZERO,
            journal: Vec::new(),
        };
        account.post(CashEntry::new(CashFlowKind::Deposit, initial_cash));
        account
    }

    /// The only way cash changes.
    pub fn post(&mut self, entry: CashEntry) {
        self.cash += entry.amount;
        self.journal.push(entry);
    }

    pub fn journal(&self) -> &[CashEntry] {
        &self.journal
    }

    pub fn journal_total(&self) -> Decimal {
        self.journal.iter().map(|e| e.amount).sum()
    }

    /// Panics if cash has drifted from its journal.
    pub fn assert_balanced(&self) {
        assert_eq!(self.cash, self.journal_total(), "cash journal drift");
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub(crate) fn position_mut(&mut self, symbol: &str) -> &mut Position {
        self.positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol))
    }

    /// Net signed quantity, zero for unknown symbols.
    pub fn net_quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |p| p.quantity)
    }

    /// Book a trade into `symbol`'s lots and accumulate realized PnL.
    pub fn book_trade(
        &mut self,
        symbol: &str,
        signed_qty: i64,
        price: Decimal,
        date: NaiveDate,
        multiplier: Decimal,
    ) -> Decimal {
        let realized = self.position_mut(symbol).book(signed_qty, price, date, multiplier);
        self.realized_pnl += realized;
        realized
    }

    /// Flatten `symbol` and book `realized` as its settlement PnL.
    pub(crate) fn close_out(&mut self, symbol: &str, realized: Decimal) {
        self.position_mut(symbol).close_out(realized);
        self.realized_pnl += realized;
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| !p.is_flat())
    }
}
