//! Matching and accounting core.
//!
//! - Gap-aware bar matching for market, limit, stop and stop-limit orders
//! - Commission and slippage on fills
//! - FIFO lot ledger and cash journal
//! - Option expiry settlement and futures variation margin
//! - Mark-to-market snapshots
//! - Session replay and parallel scenarios

pub mod commission;
pub mod engine;
pub mod ledger;
pub mod matching;
pub mod replay;
pub mod settlement;
pub mod slippage;
pub mod snapshot;

pub use commission::{Commission, CommissionModel};
pub use engine::{BacktestEngine, EngineError};
pub use ledger::{AccountState, CashEntry, CashFlowKind, Lot, Position};
pub use matching::MatchOutcome;
pub use replay::{run_parallel, run_session, replay, Scenario, ScenarioResult, SessionData, SessionReport};
pub use settlement::Settlement;
pub use slippage::SlippageModel;
pub use snapshot::{MarkSource, PositionSnapshot, Snapshot};
