//! Order requests, live orders, fills and order reports.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{
    OrderId, OrderKind, OrderSide, OrderStatus, OrderType, RejectReason, TimeInForce,
};

/// An order as submitted by a strategy, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn new(symbol: &str, side: OrderSide, quantity: i64, order_type: OrderType) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type,
            time_in_force: TimeInForce::Day,
            limit_price: None,
            stop_price: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: i64) -> Self {
        Self::new(symbol, side, quantity, OrderType::Market)
    }

    pub fn limit(symbol: &str, side: OrderSide, quantity: i64, limit: Decimal) -> Self {
        Self::new(symbol, side, quantity, OrderType::Limit).with_limit_price(limit)
    }

    pub fn stop(symbol: &str, side: OrderSide, quantity: i64, stop: Decimal) -> Self {
        Self::new(symbol, side, quantity, OrderType::Stop).with_stop_price(stop)
    }

    pub fn stop_limit(
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        stop: Decimal,
        limit: Decimal,
    ) -> Self {
        Self::new(symbol, side, quantity, OrderType::StopLimit)
            .with_stop_price(stop)
            .with_limit_price(limit)
    }

    pub fn with_limit_price(mut self, price: Decimal) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop_price(mut self, price: Decimal) -> Self {
        self.stop_price = Some(price);
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_client_order_id(mut self, id: &str) -> Self {
        self.client_order_id = Some(id.to_string());
        self
    }

    /// Check required fields and resolve the priced order kind.
    pub fn validate(&self) -> Result<OrderKind, RejectReason> {
        if self.quantity <= 0 {
            return Err(RejectReason::NonPositiveQuantity(self.quantity));
        }
        if self.symbol.trim().is_empty() {
            return Err(RejectReason::EmptySymbol);
        }
        OrderKind::resolve(self.order_type, self.limit_price, self.stop_price)
    }
}

/// Which matching rule produced a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillNote {
    /// Market order at the bar open.
    MarketOpen,
    /// Bar opened through the order's price level.
    GapOpen,
    /// Intrabar touch of a limit level.
    LimitTouch,
    /// Intrabar trigger of a stop level.
    StopTrigger,
}

impl fmt::Display for FillNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FillNote::MarketOpen => "market-open",
            FillNote::GapOpen => "gap-open",
            FillNote::LimitTouch => "limit-touch",
            FillNote::StopTrigger => "stop-trigger",
        };
        write!(f, "{}", s)
    }
}

/// One execution against a bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    /// Contracts executed, always positive.
    pub quantity: i64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub date: NaiveDate,
    pub fee: Option<Decimal>,
    pub note: FillNote,
}

impl Fill {
    /// Position change caused by this fill (long positive).
    pub fn signed_quantity(&self) -> i64 {
        self.side.signed(self.quantity)
    }

    pub fn fee_or_zero(&self) -> Decimal {
        self.fee.unwrap_or(Decimal::ZERO)
    }
}

/// A submitted order and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub filled_qty: i64,
    /// Volume-weighted average over all fills.
    pub avg_fill_price: Option<Decimal>,
    pub fills: Vec<Fill>,
    /// Set once a stop-limit's stop level has been crossed.
    pub stop_triggered: bool,
    pub reject_reason: Option<RejectReason>,
    pub submitted_on: Option<NaiveDate>,
}

impl Order {
    /// Build an order from a request. Invalid requests come back REJECTED.
    pub fn from_request(id: OrderId, request: OrderRequest, submitted_on: Option<NaiveDate>) -> Self {
        let (status, reject_reason) = match request.validate() {
            Ok(_) => (OrderStatus::New, None),
            Err(reason) => (OrderStatus::Rejected, Some(reason)),
        };

        Self {
            id,
            client_order_id: request.client_order_id,
            symbol: request.symbol,
            side: request.side,
            quantity: request.quantity,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            reduce_only: request.reduce_only,
            status,
            filled_qty: 0,
            avg_fill_price: None,
            fills: Vec::new(),
            stop_triggered: false,
            reject_reason,
            submitted_on,
        }
    }

    /// Priced order kind. `None` only for rejected orders.
    pub fn kind(&self) -> Option<OrderKind> {
        OrderKind::resolve(self.order_type, self.limit_price, self.stop_price).ok()
    }

    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled_qty
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Move to `target`. Leaving a terminal state is a ledger bug.
    pub(crate) fn transition_to(&mut self, target: OrderStatus) {
        assert!(
            self.status.can_transition_to(target),
            "order {} cannot move from {} to {}",
            self.id,
            self.status,
            target
        );
        self.status = target;
    }

    /// Append a fill and update cumulative quantity, VWAP and status.
    pub(crate) fn record_fill(&mut self, fill: Fill) {
        assert!(
            fill.quantity > 0 && fill.quantity <= self.remaining(),
            "order {} overfilled: fill {} with {} remaining",
            self.id,
            fill.quantity,
            self.remaining()
        );

        let total = self.filled_qty + fill.quantity;
        let prior_value = self.avg_fill_price.unwrap_or(Decimal::ZERO) * Decimal::from(self.filled_qty);
        let fill_value = fill.price * Decimal::from(fill.quantity);
        self.avg_fill_price = Some((prior_value + fill_value) / Decimal::from(total));
        self.filled_qty = total;

        let next = if self.remaining() == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition_to(next);
        self.fills.push(fill);
    }

    pub fn report(&self) -> OrderReport {
        OrderReport {
            id: self.id,
            client_order_id: self.client_order_id.clone(),
            symbol: self.symbol.clone(),
            status: self.status,
            filled_qty: self.filled_qty,
            avg_fill_price: self.avg_fill_price,
            remaining_qty: if self.is_terminal() { 0 } else { self.remaining() },
            reject_reason: self.reject_reason.clone(),
        }
    }
}

/// Externally visible order state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub id: OrderId,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub status: OrderStatus,
    pub filled_qty: i64,
    pub avg_fill_price: Option<Decimal>,
    /// Quantity still working; zero once the order is terminal.
    pub remaining_qty: i64,
    pub reject_reason: Option<RejectReason>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(order: &Order, qty: i64, price: Decimal) -> Fill {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        Fill {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: qty,
            price,
            timestamp: date.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            date,
            fee: None,
            note: FillNote::MarketOpen,
        }
    }

    #[test]
    fn test_invalid_request_is_rejected() {
        let req = OrderRequest::new("SPYC500", OrderSide::Buy, 5, OrderType::Limit);
        let order = Order::from_request(1, req, None);
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(
            order.reject_reason,
            Some(RejectReason::MissingLimitPrice(OrderType::Limit))
        );
        assert!(order.kind().is_none());

        let order = Order::from_request(2, OrderRequest::market("SPYC500", OrderSide::Buy, 0), None);
        assert_eq!(order.reject_reason, Some(RejectReason::NonPositiveQuantity(0)));
    }

    #[test]
    fn test_vwap_and_status_progression() {
        let req = OrderRequest::market("SPYC500", OrderSide::Buy, 10);
        let mut order = Order::from_request(7, req, None);
        assert_eq!(order.status, OrderStatus::New);

        let f = fill(&order, 4, dec!(2.00));
        order.record_fill(f);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining(), 6);

        let f = fill(&order, 6, dec!(2.50));
        order.record_fill(f);
        assert_eq!(order.status, OrderStatus::Filled);
        // (4 * 2.00 + 6 * 2.50) / 10
        assert_eq!(order.avg_fill_price, Some(dec!(2.30)));
        assert_eq!(order.fills.len(), 2);
        assert_eq!(order.report().remaining_qty, 0);
    }

    #[test]
    #[should_panic(expected = "overfilled")]
    fn test_overfill_panics() {
        let mut order = Order::from_request(1, OrderRequest::market("X", OrderSide::Sell, 1), None);
        let f = fill(&order, 2, dec!(1));
        order.record_fill(f);
    }

    #[test]
    #[should_panic(expected = "cannot move")]
    fn test_terminal_transition_panics() {
        let mut order = Order::from_request(1, OrderRequest::market("X", OrderSide::Sell, 1), None);
        order.transition_to(OrderStatus::Canceled);
        order.transition_to(OrderStatus::Expired);
    }
}
