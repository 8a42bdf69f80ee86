//! Tracking table for in-flight and recently filled orders.

use super::types::{OrderStatus, TrackedOrder};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of completely filled orders kept for lookup.
pub const DEFAULT_FILLED_ORDER_RETENTION: usize = 1000;

/// Order table keyed by caller-supplied order id.
///
/// Open and partially filled orders stay until cancelled or filled.
/// Completely filled orders are retained in a bounded FIFO so duplicate fill
/// events can be recognised, and the oldest are evicted past the limit.
#[derive(Debug)]
pub struct OrderBook {
    orders: HashMap<String, TrackedOrder>,
    /// Filled order ids, oldest first
    filled: VecDeque<String>,
    /// Maximum filled orders retained
    max_filled: usize,
}

impl OrderBook {
    pub fn new(max_filled: usize) -> Self {
        Self {
            orders: HashMap::new(),
            filled: VecDeque::new(),
            max_filled,
        }
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.orders.contains_key(order_id)
    }

    pub fn get(&self, order_id: &str) -> Option<&TrackedOrder> {
        self.orders.get(order_id)
    }

    pub(crate) fn insert(&mut self, order: TrackedOrder) {
        self.orders.insert(order.order_id.clone(), order);
    }

    pub(crate) fn remove(&mut self, order_id: &str) -> Option<TrackedOrder> {
        let removed = self.orders.remove(order_id);
        if matches!(&removed, Some(order) if order.is_filled()) {
            self.filled.retain(|id| id != order_id);
        }
        removed
    }

    /// Record `count` more contracts filled on an order, updating its status.
    ///
    /// Completely filled orders enter the retention queue; the oldest
    /// retained orders are evicted once the queue exceeds its limit.
    pub(crate) fn record_fill(&mut self, order_id: &str, count: i64) {
        let Some(order) = self.orders.get_mut(order_id) else {
            return;
        };

        order.filled_count = (order.filled_count + count).min(order.count);
        if order.filled_count < order.count {
            order.status = OrderStatus::PartiallyFilled;
            return;
        }

        order.status = OrderStatus::Filled;
        self.filled.push_back(order_id.to_string());

        while self.filled.len() > self.max_filled {
            if let Some(evicted) = self.filled.pop_front() {
                self.orders.remove(&evicted);
                debug!(order_id = %evicted, "Evicted filled order from retention");
            }
        }
    }

    /// Orders for a strategy that still have an unfilled remainder.
    pub fn open_orders(&self, strategy_id: &str) -> Vec<TrackedOrder> {
        let mut open: Vec<TrackedOrder> = self
            .orders
            .values()
            .filter(|o| o.strategy_id == strategy_id && !o.is_filled())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        open
    }

    pub fn open_count(&self) -> usize {
        self.orders.len() - self.filled.len()
    }

    pub fn retained_filled_count(&self) -> usize {
        self.filled.len()
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new(DEFAULT_FILLED_ORDER_RETENTION)
    }
}
