//! Market data types consumed by the replay engine.
//!
//! Bars are produced by an external ingestion layer and handed to the engine
//! in increasing date order. The engine never reorders or validates them.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// In-the-money amount of one unit at `spot`, floored at zero.
    pub fn intrinsic(&self, spot: Decimal, strike: Decimal) -> Decimal {
        let raw = match self {
            Self::Call => spot - strike,
            Self::Put => strike - spot,
        };
        raw.max(Decimal::ZERO)
    }
}

/// Bar field used as the valuation mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkField {
    #[default]
    Settle,
    Close,
    Open,
}

impl MarkField {
    const CANONICAL: [MarkField; 3] = [MarkField::Settle, MarkField::Close, MarkField::Open];

    /// Preferred field first, then the remaining fields as settle, close, open.
    pub fn fallback_order(&self) -> [MarkField; 3] {
        let mut order = [*self; 3];
        let mut next = 1;
        for field in Self::CANONICAL {
            if field != *self {
                order[next] = field;
                next += 1;
            }
        }
        order
    }
}

/// One periodic OHLC bar for a single contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Replay date of the bar.
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Exchange settlement price, when published.
    #[serde(default)]
    pub settle: Option<Decimal>,
    /// Traded contracts, used for participation caps.
    #[serde(default)]
    pub volume: Option<i64>,
    /// Bar timestamp; defaults to midnight UTC of `date`.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Bar {
    pub fn new(date: NaiveDate, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            settle: None,
            volume: None,
            timestamp: None,
        }
    }

    /// A bar that traded at a single price all session.
    pub fn flat(date: NaiveDate, price: Decimal) -> Self {
        Self::new(date, price, price, price, price)
    }

    pub fn with_settle(mut self, settle: Decimal) -> Self {
        self.settle = Some(settle);
        self
    }

    pub fn with_volume(mut self, volume: i64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Value of a single field, if the bar carries it.
    pub fn field(&self, field: MarkField) -> Option<Decimal> {
        match field {
            MarkField::Settle => self.settle,
            MarkField::Close => Some(self.close),
            MarkField::Open => Some(self.open),
        }
    }

    /// Mark price using `preferred` and its fallback order.
    pub fn mark(&self, preferred: MarkField) -> Decimal {
        preferred
            .fallback_order()
            .iter()
            .find_map(|f| self.field(*f))
            .unwrap_or(self.close)
    }

    /// Timestamp stamped on fills produced by this bar.
    pub fn fill_time(&self) -> DateTime<Utc> {
        self.timestamp
            .unwrap_or_else(|| self.date.and_time(NaiveTime::MIN).and_utc())
    }
}
