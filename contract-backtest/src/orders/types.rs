//! Order enums and the tagged order-kind variant used by the matcher.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-assigned order identifier, unique per engine instance.
pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    /// Signed quantity for an unsigned trade size on this side.
    pub fn signed(&self, quantity: i64) -> i64 {
        self.sign() * quantity
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type as submitted. Prices live alongside it on the request until
/// validation resolves both into an [`OrderKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Valid until the end of the current session.
    #[default]
    Day,
    /// Valid until canceled.
    Gtc,
    /// Fill what is possible on the next bar, expire the rest.
    Ioc,
    /// Fill the whole remainder on the next bar or expire untouched.
    Fok,
}

impl TimeInForce {
    /// IOC and FOK never survive the bar they are evaluated on.
    pub fn is_immediate(&self) -> bool {
        matches!(self, TimeInForce::Ioc | TimeInForce::Fok)
    }
}

/// Order lifecycle state.
///
/// ```text
/// NEW ─┬→ PARTIALLY_FILLED ─┬→ FILLED
///      │                    ├→ CANCELED
///      ├→ FILLED            └→ EXPIRED
///      ├→ CANCELED
///      ├→ EXPIRED
///      └→ REJECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        match self {
            OrderStatus::New => matches!(
                target,
                OrderStatus::PartiallyFilled
                    | OrderStatus::Filled
                    | OrderStatus::Canceled
                    | OrderStatus::Expired
                    | OrderStatus::Rejected
            ),
            OrderStatus::PartiallyFilled => matches!(
                target,
                OrderStatus::PartiallyFilled
                    | OrderStatus::Filled
                    | OrderStatus::Canceled
                    | OrderStatus::Expired
            ),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// Why a submission was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),

    #[error("symbol is empty")]
    EmptySymbol,

    #[error("{0} order requires a limit price")]
    MissingLimitPrice(OrderType),

    #[error("{0} order requires a stop price")]
    MissingStopPrice(OrderType),

    #[error("prices must be positive")]
    NonPositivePrice,
}

/// Validated order type with its price levels attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit { limit: Decimal },
    Stop { stop: Decimal },
    StopLimit { stop: Decimal, limit: Decimal },
}

impl OrderKind {
    /// Resolve an order type and its optional prices into a kind.
    pub fn resolve(
        order_type: OrderType,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> Result<Self, RejectReason> {
        let limit = || limit_price.ok_or(RejectReason::MissingLimitPrice(order_type));
        let stop = || stop_price.ok_or(RejectReason::MissingStopPrice(order_type));

        let kind = match order_type {
            OrderType::Market => OrderKind::Market,
            OrderType::Limit => OrderKind::Limit { limit: limit()? },
            OrderType::Stop => OrderKind::Stop { stop: stop()? },
            OrderType::StopLimit => OrderKind::StopLimit {
                stop: stop()?,
                limit: limit()?,
            },
        };

        let non_positive = [limit_price, stop_price]
            .iter()
            .flatten()
            .any(|p| *p <= Decimal::ZERO);
        if non_positive {
            return Err(RejectReason::NonPositivePrice);
        }
        Ok(kind)
    }
}
