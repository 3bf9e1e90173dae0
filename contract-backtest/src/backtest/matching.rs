//! Gap-aware bar matching.
//!
//! Each order kind has one pure matching function. A bar is a single print
//! sequence we cannot see inside of, so fills are conservative:
//!
//! | Kind       | Side | Gap through level     | Intrabar touch     |
//! |------------|------|-----------------------|--------------------|
//! | Market     | any  | open                  | -                  |
//! | Limit L    | buy  | open <= L -> open     | low <= L -> L      |
//! | Limit L    | sell | open >= L -> open     | high >= L -> L     |
//! | Stop S     | buy  | open >= S -> open     | high >= S -> S     |
//! | Stop S     | sell | open <= S -> open     | low <= S -> S      |
//!
//! Stop-limit orders trigger like stops and then match the same bar as a
//! limit, with the limit's gap rule. A triggered order that cannot fill stays
//! armed and matches as a plain limit on later bars.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::data::Bar;
use crate::orders::{FillNote, OrderKind, OrderSide};

/// Result of testing one order against one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Fill { price: Decimal, note: FillNote },
    /// Stop-limit whose stop level traded but whose limit did not.
    Armed,
    NoFill,
}

/// Match `kind` against `bar`. `stop_latched` marks a stop-limit whose stop
/// already traded on an earlier bar; it then matches as a plain limit.
pub fn match_order(kind: OrderKind, side: OrderSide, bar: &Bar, stop_latched: bool) -> MatchOutcome {
    match kind {
        OrderKind::Market => match_market(bar),
        OrderKind::Limit { limit } => match_limit(side, limit, bar),
        OrderKind::Stop { stop } => match_stop(side, stop, bar),
        OrderKind::StopLimit { stop, limit } => {
            match_stop_limit(side, stop, limit, bar, stop_latched)
        }
    }
}

pub fn match_market(bar: &Bar) -> MatchOutcome {
    MatchOutcome::Fill {
        price: bar.open,
        note: FillNote::MarketOpen,
    }
}

pub fn match_limit(side: OrderSide, limit: Decimal, bar: &Bar) -> MatchOutcome {
    let (gapped, touched) = match side {
        OrderSide::Buy => (bar.open <= limit, bar.low <= limit),
        OrderSide::Sell => (bar.open >= limit, bar.high >= limit),
    };

    if gapped {
        MatchOutcome::Fill {
            price: bar.open,
            note: FillNote::GapOpen,
        }
    } else if touched {
        MatchOutcome::Fill {
            price: limit,
            note: FillNote::LimitTouch,
        }
    } else {
        MatchOutcome::NoFill
    }
}

pub fn match_stop(side: OrderSide, stop: Decimal, bar: &Bar) -> MatchOutcome {
    let (gapped, touched) = match side {
        OrderSide::Buy => (bar.open >= stop, bar.high >= stop),
        OrderSide::Sell => (bar.open <= stop, bar.low <= stop),
    };

    if gapped {
        MatchOutcome::Fill {
            price: bar.open,
            note: FillNote::GapOpen,
        }
    } else if touched {
        MatchOutcome::Fill {
            price: stop,
            note: FillNote::StopTrigger,
        }
    } else {
        MatchOutcome::NoFill
    }
}

pub fn match_stop_limit(
    side: OrderSide,
    stop: Decimal,
    limit: Decimal,
    bar: &Bar,
    stop_latched: bool,
) -> MatchOutcome {
    if stop_latched {
        return armed_if_no_fill(match_limit(side, limit, bar));
    }

    match match_stop(side, stop, bar) {
        MatchOutcome::Fill { .. } => armed_if_no_fill(match_limit(side, limit, bar)),
        _ => MatchOutcome::NoFill,
    }
}

fn armed_if_no_fill(outcome: MatchOutcome) -> MatchOutcome {
    match outcome {
        MatchOutcome::NoFill => MatchOutcome::Armed,
        other => other,
    }
}

/// Contracts the bar can absorb, or `None` when uncapped.
pub fn bar_liquidity(bar: &Bar, max_participation: Option<Decimal>) -> Option<i64> {
    let volume = bar.volume?;
    let rate = max_participation?;
    let capacity = (Decimal::from(volume.max(0)) * rate).floor();
    Some(capacity.to_i64().unwrap_or(i64::MAX))
}

/// Largest quantity a reduce-only order may trade against `position_qty`.
///
/// Zero when there is no opposing exposure. Without cross-zero the cap is the
/// opposing size; with it, the whole remainder may trade and flip the book.
pub fn reduce_only_cap(
    side: OrderSide,
    position_qty: i64,
    remaining: i64,
    allow_cross_zero: bool,
) -> i64 {
    let opposing = match side {
        OrderSide::Buy if position_qty < 0 => -position_qty,
        OrderSide::Sell if position_qty > 0 => position_qty,
        _ => 0,
    };

    if opposing == 0 {
        0
    } else if allow_cross_zero {
        remaining
    } else {
        remaining.min(opposing)
    }
}

/// Quantity executable this bar given the remainder and optional caps.
pub fn executable_quantity(remaining: i64, reduce_cap: Option<i64>, liquidity: Option<i64>) -> i64 {
    [Some(remaining), reduce_cap, liquidity]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(0)
        .max(0)
}
