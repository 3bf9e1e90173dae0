//! Contract registry for options and futures.

pub mod registry;

pub use registry::{ContractError, ContractKind, ContractRegistry, ContractSpec, SettlementStyle};
