//! Session replay driver.
//!
//! Feeds recorded sessions through an engine in the fixed daily order the
//! engine expects, and runs independent scenarios in parallel with one engine
//! per scenario.

use std::collections::HashMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineConfig;
use crate::contracts::ContractSpec;
use crate::data::{Bar, MarkField};
use crate::orders::{Fill, OrderId, OrderReport, OrderRequest};

use super::engine::{BacktestEngine, EngineError};
use super::ledger::CashEntry;
use super::settlement::Settlement;
use super::snapshot::Snapshot;

/// Everything that happens on one replay date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub date: NaiveDate,
    /// Submitted before the first bar of the session.
    #[serde(default)]
    pub orders: Vec<OrderRequest>,
    /// Bars in replay order.
    #[serde(default)]
    pub bars: Vec<(String, Bar)>,
    /// Keyed by underlying symbol, used for expiry settlement.
    #[serde(default)]
    pub underlying_prices: HashMap<String, Decimal>,
}

impl SessionData {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            orders: Vec::new(),
            bars: Vec::new(),
            underlying_prices: HashMap::new(),
        }
    }

    pub fn with_order(mut self, request: OrderRequest) -> Self {
        self.orders.push(request);
        self
    }

    pub fn with_bar(mut self, symbol: &str, bar: Bar) -> Self {
        self.bars.push((symbol.to_string(), bar));
        self
    }

    pub fn with_underlying(mut self, underlying: &str, price: Decimal) -> Self {
        self.underlying_prices.insert(underlying.to_string(), price);
        self
    }

    /// Last bar seen for each symbol in this session.
    fn closing_bars(&self) -> HashMap<String, Bar> {
        self.bars.iter().cloned().collect()
    }
}

/// What one session did to the book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub date: NaiveDate,
    pub submitted: Vec<OrderReport>,
    pub fills: Vec<Fill>,
    pub variation_margin: Vec<CashEntry>,
    pub settlements: Vec<Settlement>,
    pub expired: Vec<OrderId>,
    pub snapshot: Snapshot,
}

/// Run one session:
/// submit, match bars, post variation margin, settle expiries, expire DAY
/// orders, then snapshot at the session's closing bars.
pub fn run_session(engine: &mut BacktestEngine, session: &SessionData) -> SessionReport {
    let submitted: Vec<OrderReport> = session
        .orders
        .iter()
        .cloned()
        .map(|request| engine.submit(request))
        .collect();

    let fills: Vec<Fill> = session
        .bars
        .iter()
        .flat_map(|(symbol, bar)| engine.process_bar(symbol, bar))
        .collect();

    let closing = session.closing_bars();
    let settles: HashMap<String, Decimal> = closing
        .iter()
        .map(|(symbol, bar)| (symbol.clone(), bar.mark(MarkField::Settle)))
        .collect();
    let variation_margin = engine.post_variation_margin(session.date, &settles);
    let settlements = engine.settle_expiries(session.date, &session.underlying_prices);
    let expired = engine.end_of_session();
    let snapshot = engine.snapshot(session.date, &closing);

    SessionReport {
        date: session.date,
        submitted,
        fills,
        variation_margin,
        settlements,
        expired,
        snapshot,
    }
}

/// Run sessions in order through one engine.
pub fn replay(engine: &mut BacktestEngine, sessions: &[SessionData]) -> Vec<SessionReport> {
    sessions.iter().map(|s| run_session(engine, s)).collect()
}

/// An independent backtest: its own config, contracts and sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
    pub sessions: Vec<SessionData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub sessions: Vec<SessionReport>,
    /// Final state of every order submitted, by id.
    pub orders: Vec<OrderReport>,
    pub final_cash: Decimal,
    pub realized_pnl: Decimal,
}

impl ScenarioResult {
    pub fn final_snapshot(&self) -> Option<&Snapshot> {
        self.sessions.last().map(|s| &s.snapshot)
    }
}

impl Scenario {
    pub fn run(&self) -> Result<ScenarioResult, EngineError> {
        let mut engine = BacktestEngine::new(self.config.clone());
        for spec in &self.contracts {
            engine.upsert_contract(spec.clone())?;
        }

        let sessions = replay(&mut engine, &self.sessions);
        Ok(ScenarioResult {
            name: self.name.clone(),
            sessions,
            orders: engine.order_reports(),
            final_cash: engine.cash(),
            realized_pnl: engine.total_realized_pnl(),
        })
    }
}

/// Run scenarios on the rayon pool. Results keep the input order.
pub fn run_parallel(scenarios: &[Scenario]) -> Vec<Result<ScenarioResult, EngineError>> {
    info!("Running {} scenarios", scenarios.len());
    scenarios
        .par_iter()
        .map(|scenario| {
            let result = scenario.run();
            if let Ok(r) = &result {
                info!(
                    "Scenario {} complete: cash = {}, realized = {}",
                    r.name, r.final_cash, r.realized_pnl
                );
            }
            result
        })
        .collect()
}
