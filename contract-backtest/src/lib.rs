pub mod backtest;
pub mod config;
pub mod contracts;
pub mod data;
pub mod orders;

// Re-export commonly used types
pub use backtest::{
    AccountState, BacktestEngine, CashEntry, CashFlowKind, CommissionModel, EngineError,
    Position, Scenario, ScenarioResult, SessionData, Settlement, SlippageModel, Snapshot,
};
pub use config::{ConfigError, EngineConfig};
pub use contracts::{ContractError, ContractRegistry, ContractSpec, SettlementStyle};
pub use data::{Bar, MarkField, OptionType};
pub use orders::{
    Fill, Order, OrderId, OrderReport, OrderRequest, OrderSide, OrderStatus, OrderType,
    TimeInForce,
};
