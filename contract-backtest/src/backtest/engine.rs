//! Core matching and accounting engine.
//!
//! One engine owns one simulated book. A replay driver calls it serially:
//! 1. Submit or cancel orders
//! 2. Feed each bar through `process_bar` (FIFO matching, fills, ledger)
//! 3. Post futures variation margin from the session's settles
//! 4. Settle contracts expiring today
//! 5. Close the session (DAY orders expire)
//! 6. Take a snapshot

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::config::EngineConfig;
use crate::contracts::{ContractError, ContractRegistry, ContractSpec, SettlementStyle};
use crate::data::Bar;
use crate::orders::{
    Fill, FillNote, Order, OrderId, OrderKind, OrderReport, OrderRequest, OrderSide, OrderStatus,
    OrderStore, TimeInForce,
};

use super::ledger::{AccountState, CashEntry, CashFlowKind, Position};
use super::matching::{
    bar_liquidity, executable_quantity, match_order, reduce_only_cap, MatchOutcome,
};
use super::settlement::{self, Settlement};
use super::slippage::SlippageModel;
use super::snapshot::{value_account, MarkSource, Snapshot};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown order id: {0}")]
    UnknownOrder(OrderId),

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),
}

/// The matching and accounting engine for one simulated book.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: EngineConfig,
    contracts: ContractRegistry,
    orders: OrderStore,
    account: AccountState,
    last_bars: HashMap<String, Bar>,
    current_date: Option<NaiveDate>,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig) -> Self {
        let account = AccountState::new(config.initial_cash);
        Self {
            config,
            contracts: ContractRegistry::new(),
            orders: OrderStore::new(),
            account,
            last_bars: HashMap::new(),
            current_date: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register or correct a contract spec.
    pub fn upsert_contract(&mut self, spec: ContractSpec) -> Result<(), EngineError> {
        self.contracts.upsert(spec)?;
        Ok(())
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    /// Submit an order. Invalid requests are stored as REJECTED and reported,
    /// never returned as errors.
    pub fn submit(&mut self, request: OrderRequest) -> OrderReport {
        let report = self.orders.insert(request, self.current_date).report();

        match &report.reject_reason {
            Some(reason) => debug!(order_id = report.id, %reason, "order rejected"),
            None => debug!(order_id = report.id, symbol = %report.symbol, "order accepted"),
        }
        report
    }

    /// Cancel a working order. Terminal orders are left as they are.
    pub fn cancel(&mut self, id: OrderId) -> Result<OrderReport, EngineError> {
        self.orders.finish(id, OrderStatus::Canceled);
        self.order_report(id).ok_or(EngineError::UnknownOrder(id))
    }

    /// Cancel every working order, optionally only for `symbol`.
    pub fn cancel_all(&mut self, symbol: Option<&str>) -> Vec<OrderId> {
        let ids = match symbol {
            Some(symbol) => self.orders.active_ids_for(symbol),
            None => self.orders.active_ids(),
        };
        ids.into_iter()
            .filter(|id| self.orders.finish(*id, OrderStatus::Canceled))
            .collect()
    }

    /// Match every working order for `symbol` against `bar`, in submission
    /// order, and apply the resulting fills.
    pub fn process_bar(&mut self, symbol: &str, bar: &Bar) -> Vec<Fill> {
        self.current_date = Some(bar.date);

        let fills: Vec<Fill> = self
            .orders
            .active_ids_for(symbol)
            .into_iter()
            .filter_map(|id| self.evaluate(id, bar))
            .collect();

        self.last_bars.insert(symbol.to_string(), bar.clone());
        self.check_ledger();
        fills
    }

    /// Expire DAY orders at the session boundary.
    pub fn end_of_session(&mut self) -> Vec<OrderId> {
        let day_orders: Vec<OrderId> = self
            .orders
            .active_ids()
            .into_iter()
            .filter(|id| {
                self.orders
                    .get(*id)
                    .map_or(false, |o| o.time_in_force == TimeInForce::Day)
            })
            .collect();

        day_orders
            .into_iter()
            .filter(|id| self.orders.finish(*id, OrderStatus::Expired))
            .collect()
    }

    /// Settle and flatten positions in contracts expiring on `date`.
    pub fn settle_expiries(
        &mut self,
        date: NaiveDate,
        underlying_prices: &HashMap<String, Decimal>,
    ) -> Vec<Settlement> {
        self.current_date = Some(date);
        let settlements =
            settlement::settle_expiries(&mut self.account, &self.contracts, date, underlying_prices);
        self.check_ledger();
        settlements
    }

    /// Post daily variation margin for futures at the given settles.
    pub fn post_variation_margin(
        &mut self,
        date: NaiveDate,
        settles: &HashMap<String, Decimal>,
    ) -> Vec<CashEntry> {
        let entries =
            settlement::post_variation_margin(&mut self.account, &self.contracts, date, settles);
        self.check_ledger();
        entries
    }

    /// Submit a reduce-only IOC market order that closes `symbol` on its next
    /// bar. `None` when the position is already flat.
    pub fn flatten(&mut self, symbol: &str) -> Option<OrderReport> {
        let quantity = self.account.net_quantity(symbol);
        if quantity == 0 {
            return None;
        }
        let side = if quantity > 0 { OrderSide::Sell } else { OrderSide::Buy };
        let request = OrderRequest::market(symbol, side, quantity.abs())
            .with_time_in_force(TimeInForce::Ioc)
            .reduce_only();
        Some(self.submit(request))
    }

    /// Value the book using bars as marks. Symbols missing from `bars` fall
    /// back to the last processed bar, then to their average price.
    pub fn snapshot(&self, date: NaiveDate, bars: &HashMap<String, Bar>) -> Snapshot {
        let field = self.config.mark_field;
        value_account(&self.account, &self.contracts, date, |symbol| {
            bars.get(symbol)
                .map(|b| (b.mark(field), MarkSource::Supplied))
                .or_else(|| self.last_mark(symbol))
        })
    }

    /// Value the book at plain prices, with the same fallbacks as `snapshot`.
    pub fn snapshot_at_prices(&self, date: NaiveDate, prices: &HashMap<String, Decimal>) -> Snapshot {
        value_account(&self.account, &self.contracts, date, |symbol| {
            prices
                .get(symbol)
                .map(|p| (*p, MarkSource::Supplied))
                .or_else(|| self.last_mark(symbol))
        })
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn order_report(&self, id: OrderId) -> Option<OrderReport> {
        self.orders.get(id).map(|o| o.report())
    }

    /// Reports for every order ever submitted, by id.
    pub fn order_reports(&self) -> Vec<OrderReport> {
        self.orders.iter().map(|o| o.report()).collect()
    }

    pub fn active_orders(&self) -> Vec<&Order> {
        self.orders
            .active_ids()
            .into_iter()
            .filter_map(|id| self.orders.get(id))
            .collect()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.account.position(symbol)
    }

    pub fn net_quantity(&self, symbol: &str) -> i64 {
        self.account.net_quantity(symbol)
    }

    pub fn avg_price(&self, symbol: &str) -> Decimal {
        self.account
            .position(symbol)
            .map_or(Decimal::ZERO, |p| p.avg_price)
    }

    pub fn realized_pnl(&self, symbol: &str) -> Decimal {
        self.account
            .position(symbol)
            .map_or(Decimal::ZERO, |p| p.realized_pnl)
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.account.realized_pnl
    }

    pub fn cash(&self) -> Decimal {
        self.account.cash
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    fn last_mark(&self, symbol: &str) -> Option<(Decimal, MarkSource)> {
        self.last_bars
            .get(symbol)
            .map(|b| (b.mark(self.config.mark_field), MarkSource::LastBar))
    }

    fn expire(&mut self, id: OrderId, why: &str) {
        if self.orders.finish(id, OrderStatus::Expired) {
            debug!(order_id = id, why, "order expired");
        }
    }

    /// One fill attempt for one order on one bar.
    fn evaluate(&mut self, id: OrderId, bar: &Bar) -> Option<Fill> {
        let order = self.orders.get(id).filter(|o| o.is_active())?;
        let kind = order.kind()?;
        let side = order.side;
        let tif = order.time_in_force;
        let remaining = order.remaining();
        let latched = order.stop_triggered;
        let reduce_only = order.reduce_only;
        let symbol = order.symbol.clone();
        let position_qty = self.account.net_quantity(&symbol);

        let reduce_cap = if reduce_only {
            let cap = reduce_only_cap(
                side,
                position_qty,
                remaining,
                self.config.reduce_only_allow_cross_zero,
            );
            if cap == 0 {
                self.expire(id, "no opposing position to reduce");
                return None;
            }
            Some(cap)
        } else {
            None
        };

        let outcome = match_order(kind, side, bar, latched);
        if matches!(kind, OrderKind::StopLimit { .. }) && outcome != MatchOutcome::NoFill {
            self.orders.latch_stop(id);
        }

        let MatchOutcome::Fill { price, note } = outcome else {
            if tif.is_immediate() {
                self.expire(id, "no fill on its bar");
            }
            return None;
        };

        let liquidity = bar_liquidity(bar, self.config.max_participation);
        let quantity = executable_quantity(remaining, reduce_cap, liquidity);

        if tif == TimeInForce::Fok && quantity < remaining {
            self.expire(id, "fill-or-kill not fully executable");
            return None;
        }
        if quantity == 0 {
            if tif.is_immediate() {
                self.expire(id, "no liquidity on its bar");
            }
            return None;
        }

        let price = if SlippageModel::applies_to(kind) {
            self.config.slippage.adjust(side, price)
        } else {
            price
        };
        if self.config.enforce_buying_power {
            let outlay = self.cash_outlay(&symbol, side, quantity, price);
            if outlay > self.account.cash {
                debug!(order_id = id, outlay = %outlay, cash = %self.account.cash, "fill exceeds buying power");
                self.expire(id, "insufficient buying power");
                return None;
            }
        }
        let fill = self.apply_fill(id, quantity, price, note, bar);

        let still_working = self.orders.get(id).map_or(false, |o| o.is_active());
        if still_working {
            let capped_at_flat = reduce_cap == Some(quantity) && quantity < remaining;
            if tif.is_immediate() {
                self.expire(id, "immediate-or-cancel residual");
            } else if capped_at_flat {
                self.expire(id, "reduce-only residual past flat");
            }
        }
        Some(fill)
    }

    /// Net cash a fill would take out of the account: premium paid on buys
    /// plus commission. Futures fills only cost commission.
    fn cash_outlay(&self, symbol: &str, side: OrderSide, quantity: i64, price: Decimal) -> Decimal {
        let multiplier = self.contracts.multiplier(symbol);
        let notional = price * multiplier * Decimal::from(quantity);
        let fee = self.config.commission.calculate(quantity, notional).total;
        match self.contracts.settlement_style(symbol) {
            SettlementStyle::Premium => Decimal::from(side.sign()) * notional + fee,
            SettlementStyle::VariationMargin => fee,
        }
    }

    /// Post cash, update the order, and book the trade into the lots.
    fn apply_fill(
        &mut self,
        id: OrderId,
        quantity: i64,
        price: Decimal,
        note: FillNote,
        bar: &Bar,
    ) -> Fill {
        let (symbol, side) = match self.orders.get(id) {
            Some(order) => (order.symbol.clone(), order.side),
            None => panic!("fill for unknown order {}", id),
        };
        let multiplier = self.contracts.multiplier(&symbol);
        let style = self.contracts.settlement_style(&symbol);
        let notional = price * multiplier * Decimal::from(quantity);
        let commission = self.config.commission.calculate(quantity, notional).total;
        let fee = (!commission.is_zero()).then_some(commission);

        let fill = Fill {
            order_id: id,
            symbol: symbol.clone(),
            side,
            quantity,
            price,
            timestamp: bar.fill_time(),
            date: bar.date,
            fee,
            note,
        };

        match style {
            SettlementStyle::Premium => {
                // Buys pay premium, sells receive it.
                let amount = -Decimal::from(side.sign()) * notional;
                self.account.post(
                    CashEntry::new(CashFlowKind::Premium, amount)
                        .on(bar.date)
                        .for_symbol(&symbol)
                        .for_order(id),
                );
            }
            SettlementStyle::VariationMargin => {
                settlement::mark_to_price(&mut self.account, &symbol, price, multiplier, bar.date, Some(id));
            }
        }
        if let Some(fee) = fee {
            self.account.post(
                CashEntry::new(CashFlowKind::Fee, -fee)
                    .on(bar.date)
                    .for_symbol(&symbol)
                    .for_order(id),
            );
        }

        let status = self.orders.record_fill(id, fill.clone());
        let realized = self
            .account
            .book_trade(&symbol, side.signed(quantity), price, bar.date, multiplier);

        if style == SettlementStyle::VariationMargin {
            let position = self.account.position_mut(&symbol);
            if !position.is_flat() {
                position.settle_mark = Some(price);
            }
        }

        debug!(
            order_id = id,
            symbol = %symbol,
            side = %side,
            quantity,
            price = %price,
            note = %note,
            status = %status,
            realized = %realized,
            "fill applied"
        );
        fill
    }

    fn check_ledger(&self) {
        if cfg!(debug_assertions) {
            self.account.assert_balanced();
            for position in self.account.positions.values() {
                position.check_invariants();
            }
        }
    }
}
