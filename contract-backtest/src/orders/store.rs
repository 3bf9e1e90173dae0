//! Order table plus the FIFO queue of working orders.
//!
//! Every status change goes through the store so the active queue never holds
//! a terminal order.

use std::collections::{HashMap, VecDeque};

use chrono::NaiveDate;
use tracing::debug;

use super::order::{Fill, Order, OrderRequest};
use super::types::{OrderId, OrderStatus};

#[derive(Debug, Clone)]
pub struct OrderStore {
    orders: HashMap<OrderId, Order>,
    queue: VecDeque<OrderId>,
    next_id: OrderId,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self {
            orders: HashMap::new(),
            queue: VecDeque::new(),
            next_id: 1,
        }
    }
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new order. Accepted orders join the back of the queue; rejected
    /// ones are kept for reporting only.
    pub fn insert(&mut self, request: OrderRequest, submitted_on: Option<NaiveDate>) -> &Order {
        let id = self.next_id;
        self.next_id += 1;

        let order = Order::from_request(id, request, submitted_on);
        if order.status == OrderStatus::New {
            self.queue.push_back(id);
        }
        self.orders.entry(id).or_insert(order)
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Working orders for `symbol`, in submission order.
    pub fn active_ids_for(&self, symbol: &str) -> Vec<OrderId> {
        self.queue
            .iter()
            .copied()
            .filter(|id| self.orders.get(id).map_or(false, |o| o.symbol == symbol))
            .collect()
    }

    /// All working orders, in submission order.
    pub fn active_ids(&self) -> Vec<OrderId> {
        self.queue.iter().copied().collect()
    }

    pub fn active_len(&self) -> usize {
        self.queue.len()
    }

    /// Move a working order to a terminal state. Returns false when the order
    /// is unknown or already terminal.
    pub fn finish(&mut self, id: OrderId, status: OrderStatus) -> bool {
        debug_assert!(status.is_terminal());
        let Some(order) = self.orders.get_mut(&id) else {
            return false;
        };
        if order.is_terminal() {
            return false;
        }
        order.transition_to(status);
        debug!(order_id = id, status = %status, "order finished");
        self.dequeue(id);
        true
    }

    pub(crate) fn record_fill(&mut self, id: OrderId, fill: Fill) -> OrderStatus {
        let order = self
            .orders
            .get_mut(&id)
            .unwrap_or_else(|| panic!("fill for unknown order {}", id));
        order.record_fill(fill);
        let status = order.status;
        if status.is_terminal() {
            self.dequeue(id);
        }
        status
    }

    pub(crate) fn latch_stop(&mut self, id: OrderId) {
        if let Some(order) = self.orders.get_mut(&id) {
            order.stop_triggered = true;
        }
    }

    /// Every order ever submitted, by id.
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        let mut ids: Vec<_> = self.orders.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(move |id| self.orders.get(&id))
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn dequeue(&mut self, id: OrderId) {
        self.queue.retain(|queued| *queued != id);
    }
}
