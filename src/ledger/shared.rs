//! Thread-safe handle to a [`CapitalLedger`].
//!
//! A single `RwLock` guards strategies, states and the order table together.
//! Every mutation holds the write lock for its whole duration and snapshots
//! hold the read lock, so no observer sees a half-applied operation.

use super::allocator::{CapitalLedger, LedgerOptions};
use super::error::Result;
use super::snapshot::{AllocationSnapshot, LedgerStats, StrategySnapshot};
use super::types::{
    CancelOutcome, FillOutcome, OrderDraft, ReserveOutcome, StrategyConfig,
    StrategyConfigPatch, StrategyStatus, TrackedOrder,
};
use rust_decimal::Decimal;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cloneable, shared ledger passed to every collaborator.
#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<RwLock<CapitalLedger>>,
}

impl SharedLedger {
    pub fn new(total_cash: i64) -> Self {
        Self::from_ledger(CapitalLedger::new(total_cash))
    }

    pub fn with_options(total_cash: i64, options: LedgerOptions) -> Self {
        Self::from_ledger(CapitalLedger::with_options(total_cash, options))
    }

    pub fn from_ledger(ledger: CapitalLedger) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ledger)),
        }
    }

    // A panic while holding the write lock may have left the ledger half
    // mutated, so poisoning is not recovered from.
    fn read(&self) -> RwLockReadGuard<'_, CapitalLedger> {
        self.inner.read().expect("ledger lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, CapitalLedger> {
        self.inner.write().expect("ledger lock poisoned")
    }

    /// Run a read-only closure against one consistent view of the ledger.
    pub fn inspect<R>(&self, f: impl FnOnce(&CapitalLedger) -> R) -> R {
        f(&self.read())
    }

    pub fn register_strategy(&self, config: StrategyConfig) -> Result<()> {
        self.write().register_strategy(config)
    }

    pub fn update_config(&self, id: &str, patch: StrategyConfigPatch) -> Result<()> {
        self.write().update_config(id, patch)
    }

    pub fn remove_strategy(&self, id: &str) -> Result<()> {
        self.write().remove_strategy(id)
    }

    pub fn reallocate(&self, id: &str, new_pct: Decimal) -> Result<()> {
        self.write().reallocate(id, new_pct)
    }

    pub fn update_total_cash(&self, new_total: i64) {
        self.write().update_total_cash(new_total)
    }

    pub fn mark_active(&self, id: &str) -> Result<StrategyStatus> {
        self.write().mark_active(id)
    }

    pub fn report_error(&self, id: &str, message: impl Into<String>) -> Result<()> {
        self.write().report_error(id, message)
    }

    pub fn reserve_for_order(
        &self,
        strategy_id: &str,
        draft: OrderDraft,
    ) -> Result<ReserveOutcome> {
        self.write().reserve_for_order(strategy_id, draft)
    }

    pub fn on_order_filled(
        &self,
        order_id: &str,
        fill_price: i64,
        fill_count: i64,
        fee: i64,
    ) -> FillOutcome {
        self.write()
            .on_order_filled(order_id, fill_price, fill_count, fee)
    }

    pub fn on_order_cancelled(&self, order_id: &str) -> CancelOutcome {
        self.write().on_order_cancelled(order_id)
    }

    pub fn update_price(&self, ticker: &str, price: i64) {
        self.write().update_price(ticker, price)
    }

    pub fn snapshot(&self) -> AllocationSnapshot {
        self.read().snapshot()
    }

    pub fn strategy_snapshot(&self, id: &str) -> Option<StrategySnapshot> {
        self.read().strategy_snapshot(id)
    }

    pub fn configs(&self) -> Vec<StrategyConfig> {
        self.read().configs()
    }

    pub fn order(&self, order_id: &str) -> Option<TrackedOrder> {
        self.read().order(order_id).cloned()
    }

    pub fn open_orders(&self, strategy_id: &str) -> Vec<TrackedOrder> {
        self.read().open_orders(strategy_id)
    }

    pub fn total_cash(&self) -> i64 {
        self.read().total_cash()
    }

    pub fn total_allocation(&self) -> Decimal {
        self.read().total_allocation()
    }

    pub fn allocation_epsilon(&self) -> Decimal {
        self.read().allocation_epsilon()
    }

    pub fn stats(&self) -> LedgerStats {
        self.read().stats()
    }
}
