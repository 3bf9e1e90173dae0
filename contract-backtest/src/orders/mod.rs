//! Order submission, lifecycle and storage.
//!
//! - `types` - sides, order types, time-in-force, statuses
//! - `order` - requests, live orders, fills, reports
//! - `store` - order table and FIFO working queue

pub mod order;
pub mod store;
pub mod types;

pub use order::{Fill, FillNote, Order, OrderReport, OrderRequest};
pub use store::OrderStore;
pub use types::{
    OrderId, OrderKind, OrderSide, OrderStatus, OrderType, RejectReason, TimeInForce,
};
