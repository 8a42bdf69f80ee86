//! Capital ledger: partitions one pool of cash across strategies.
//!
//! Owns every strategy's config and financial state together with the
//! order tracking table. All operations are synchronous in-memory
//! transitions that either apply completely or reject without touching
//! state. Thread-safe access goes through [`SharedLedger`].
//!
//! [`SharedLedger`]: super::SharedLedger

use super::error::{LedgerError, Result};
use super::orders::{OrderBook, DEFAULT_FILLED_ORDER_RETENTION};
use super::snapshot::{AllocationSnapshot, LedgerStats, StrategySnapshot};
use super::types::{
    CancelOutcome, FillOutcome, OrderAction, OrderDraft, PositionEntry, ReserveOutcome,
    StrategyConfig, StrategyConfigPatch, StrategyState, StrategyStatus, TrackedOrder,
    ALLOCATION_EPSILON,
};
use crate::utils::{floor_share, rounded_weighted_average, saturating_release};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Tunables for a ledger instance.
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    /// Tolerance on Σ allocation_pct ≤ 1
    pub allocation_epsilon: Decimal,
    /// Completely filled orders kept for duplicate-fill detection
    pub filled_order_retention: usize,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            allocation_epsilon: ALLOCATION_EPSILON,
            filled_order_retention: DEFAULT_FILLED_ORDER_RETENTION,
        }
    }
}

/// Config and state live in one entry so they are created and destroyed together.
#[derive(Debug, Clone)]
pub(crate) struct StrategyEntry {
    pub(crate) config: StrategyConfig,
    pub(crate) state: StrategyState,
}

/// Per-strategy capital and P&L ledger.
pub struct CapitalLedger {
    total_cash: i64,
    options: LedgerOptions,
    strategies: BTreeMap<String, StrategyEntry>,
    orders: OrderBook,
    unknown_order_events: u64,
}

impl CapitalLedger {
    /// Create an empty ledger over `total_cash` minor units.
    pub fn new(total_cash: i64) -> Self {
        Self::with_options(total_cash, LedgerOptions::default())
    }

    pub fn with_options(total_cash: i64, options: LedgerOptions) -> Self {
        info!(
            total_cash,
            epsilon = %options.allocation_epsilon,
            filled_order_retention = options.filled_order_retention,
            "Capital ledger created"
        );

        Self {
            total_cash,
            orders: OrderBook::new(options.filled_order_retention),
            options,
            strategies: BTreeMap::new(),
            unknown_order_events: 0,
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn total_cash(&self) -> i64 {
        self.total_cash
    }

    pub fn allocation_epsilon(&self) -> Decimal {
        self.options.allocation_epsilon
    }

    /// Σ allocation_pct over all registered strategies.
    pub fn total_allocation(&self) -> Decimal {
        self.strategies
            .values()
            .map(|e| e.config.allocation_pct)
            .sum()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strategies.contains_key(id)
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    pub fn config(&self, id: &str) -> Option<&StrategyConfig> {
        self.strategies.get(id).map(|e| &e.config)
    }

    pub fn state(&self, id: &str) -> Option<&StrategyState> {
        self.strategies.get(id).map(|e| &e.state)
    }

    /// All registered configs, ordered by id.
    pub fn configs(&self) -> Vec<StrategyConfig> {
        self.strategies.values().map(|e| e.config.clone()).collect()
    }

    pub fn order(&self, order_id: &str) -> Option<&TrackedOrder> {
        self.orders.get(order_id)
    }

    pub fn open_orders(&self, strategy_id: &str) -> Vec<TrackedOrder> {
        self.orders.open_orders(strategy_id)
    }

    pub fn unknown_order_events(&self) -> u64 {
        self.unknown_order_events
    }

    // =========================================================================
    // Registration & allocation
    // =========================================================================

    /// Admit a new strategy and carve out its allocation.
    pub fn register_strategy(&mut self, config: StrategyConfig) -> Result<()> {
        if self.strategies.contains_key(&config.id) {
            return Err(LedgerError::DuplicateStrategy(config.id));
        }
        validate_pct(&config.id, config.allocation_pct)?;
        self.check_admission(&config.id, Decimal::ZERO, config.allocation_pct)?;

        let allocated = floor_share(self.total_cash, config.allocation_pct);
        let state = StrategyState::new(allocated, config.enabled);

        info!(
            strategy_id = %config.id,
            name = %config.name,
            strategy_type = %config.strategy_type,
            pct = %config.allocation_pct,
            allocated_cash = allocated,
            status = %state.status,
            "Strategy registered"
        );

        self.strategies
            .insert(config.id.clone(), StrategyEntry { config, state });
        Ok(())
    }

    /// Apply the provided non-financial fields. Cash and allocation are untouched.
    pub fn update_config(&mut self, id: &str, patch: StrategyConfigPatch) -> Result<()> {
        let entry = self
            .strategies
            .get_mut(id)
            .ok_or_else(|| LedgerError::StrategyNotFound(id.to_string()))?;

        let fields = patch.fields();

        if let Some(name) = patch.name {
            entry.config.name = name;
        }
        if let Some(strategy_type) = patch.strategy_type {
            entry.config.strategy_type = strategy_type;
        }
        if let Some(params) = patch.params {
            entry.config.params = params;
        }
        if let Some(enabled) = patch.enabled {
            entry.config.enabled = enabled;
            let state = &mut entry.state;
            state.status = match (enabled, state.status) {
                (_, StrategyStatus::Error) => StrategyStatus::Error,
                (false, _) => StrategyStatus::Paused,
                (true, StrategyStatus::Paused) => StrategyStatus::Idle,
                (true, status) => status,
            };
        }

        info!(
            strategy_id = %id,
            fields = ?fields,
            status = %entry.state.status,
            "Strategy config updated"
        );
        Ok(())
    }

    /// Delete a quiescent strategy together with its state.
    pub fn remove_strategy(&mut self, id: &str) -> Result<()> {
        let entry = self
            .strategies
            .get(id)
            .ok_or_else(|| LedgerError::StrategyNotFound(id.to_string()))?;

        if !entry.state.is_quiescent() {
            return Err(LedgerError::RemovalBlocked {
                strategy_id: id.to_string(),
                open_positions: entry.state.positions.len(),
                locked_in_orders: entry.state.locked_in_orders,
            });
        }

        if let Some(removed) = self.strategies.remove(id) {
            info!(
                strategy_id = %id,
                released_pct = %removed.config.allocation_pct,
                realized_pnl = removed.state.realized_pnl,
                "Strategy removed"
            );
        }
        Ok(())
    }

    /// Change a strategy's allocation fraction.
    ///
    /// Available cash moves by the change in allocated cash, clamped at zero
    /// when shrinking below what is currently available. Positions and
    /// locked capital are not touched.
    pub fn reallocate(&mut self, id: &str, new_pct: Decimal) -> Result<()> {
        let old_pct = self
            .strategies
            .get(id)
            .map(|e| e.config.allocation_pct)
            .ok_or_else(|| LedgerError::StrategyNotFound(id.to_string()))?;
        validate_pct(id, new_pct)?;
        self.check_admission(id, old_pct, new_pct)?;

        let allocated = floor_share(self.total_cash, new_pct);
        let Some(entry) = self.strategies.get_mut(id) else {
            return Err(LedgerError::StrategyNotFound(id.to_string()));
        };
        entry.config.allocation_pct = new_pct;
        let delta = entry.state.apply_allocation(allocated);

        info!(
            strategy_id = %id,
            %old_pct,
            %new_pct,
            allocated_cash = allocated,
            delta,
            available_cash = entry.state.available_cash,
            "Strategy reallocated"
        );
        Ok(())
    }

    /// Rebase every strategy on a new total cash figure.
    pub fn update_total_cash(&mut self, new_total: i64) {
        let old_total = self.total_cash;
        self.total_cash = new_total;

        for (id, entry) in self.strategies.iter_mut() {
            let allocated = floor_share(new_total, entry.config.allocation_pct);
            let delta = entry.state.apply_allocation(allocated);
            if delta != 0 {
                debug!(
                    strategy_id = %id,
                    allocated_cash = allocated,
                    delta,
                    available_cash = entry.state.available_cash,
                    "Allocation rebased"
                );
            }
        }

        info!(old_total, new_total, "Total cash updated");
    }

    /// Reject when replacing `old_pct` with `new_pct` for `id` would push
    /// the allocation sum past 1 + ε.
    fn check_admission(&self, id: &str, old_pct: Decimal, new_pct: Decimal) -> Result<()> {
        let committed = self.total_allocation() - old_pct;
        let limit = Decimal::ONE + self.options.allocation_epsilon;

        if committed + new_pct > limit {
            warn!(
                strategy_id = %id,
                requested = %new_pct,
                %committed,
                %limit,
                "Allocation rejected"
            );
            return Err(LedgerError::AllocationExceeded {
                strategy_id: id.to_string(),
                requested: new_pct,
                committed,
                limit,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Status drivers
    // =========================================================================

    /// Move an idle strategy to active. Other statuses are left alone.
    pub fn mark_active(&mut self, id: &str) -> Result<StrategyStatus> {
        let state = self.state_mut(id)?;
        if state.status == StrategyStatus::Idle {
            state.status = StrategyStatus::Active;
            state.touch();
        }
        Ok(state.status)
    }

    /// Record an externally detected failure and move the strategy to error.
    pub fn report_error(&mut self, id: &str, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        let state = self.state_mut(id)?;
        state.status = StrategyStatus::Error;
        state.error_count += 1;
        state.last_error = Some(message.clone());
        state.touch();

        warn!(
            strategy_id = %id,
            error_count = state.error_count,
            error = %message,
            "Strategy moved to error"
        );
        Ok(())
    }

    fn state_mut(&mut self, id: &str) -> Result<&mut StrategyState> {
        self.strategies
            .get_mut(id)
            .map(|e| &mut e.state)
            .ok_or_else(|| LedgerError::StrategyNotFound(id.to_string()))
    }

    // =========================================================================
    // Order lifecycle
    // =========================================================================

    /// Reserve capital for an order before it is sent to the exchange.
    ///
    /// Buys lock `count × price`; insufficient available cash is reported as
    /// [`ReserveOutcome::InsufficientFunds`] with nothing changed. Sells lock
    /// nothing and are not checked against held positions.
    pub fn reserve_for_order(
        &mut self,
        strategy_id: &str,
        draft: OrderDraft,
    ) -> Result<ReserveOutcome> {
        if !self.strategies.contains_key(strategy_id) {
            return Err(LedgerError::StrategyNotFound(strategy_id.to_string()));
        }
        if self.orders.contains(&draft.order_id) {
            return Err(LedgerError::DuplicateOrder(draft.order_id));
        }
        let cost = validate_draft(&draft)?;
        let state = self.state_mut(strategy_id)?;

        if state.available_cash < cost {
            debug!(
                strategy_id = %strategy_id,
                order_id = %draft.order_id,
                required = cost,
                available = state.available_cash,
                "Reservation rejected: insufficient funds"
            );
            return Ok(ReserveOutcome::InsufficientFunds {
                required: cost,
                available: state.available_cash,
            });
        }

        state.available_cash -= cost;
        state.locked_in_orders += cost;
        state.orders_placed += 1;
        state.touch();

        debug!(
            strategy_id = %strategy_id,
            order_id = %draft.order_id,
            ticker = %draft.ticker,
            action = ?draft.action,
            count = draft.count,
            price = draft.price,
            locked = cost,
            available_cash = state.available_cash,
            "Capital reserved"
        );

        let order_id = draft.order_id.clone();
        self.orders
            .insert(TrackedOrder::from_draft(strategy_id, draft));

        Ok(ReserveOutcome::Reserved {
            order_id,
            locked: cost,
        })
    }

    /// Apply a fill reported by the exchange.
    ///
    /// Buys unlock capital at the reserved price and refund a favourable
    /// difference; an unfavourable fill is never charged beyond the
    /// reservation. Sells book realized P&L against the average cost basis
    /// and credit the proceeds.
    pub fn on_order_filled(
        &mut self,
        order_id: &str,
        fill_price: i64,
        fill_count: i64,
        fee: i64,
    ) -> FillOutcome {
        let Some(order) = self.orders.get(order_id).cloned() else {
            self.record_unknown_order(order_id, "fill");
            return FillOutcome::UnknownOrder;
        };
        if order.is_filled() {
            warn!(order_id = %order_id, "Duplicate fill for completed order ignored");
            return FillOutcome::AlreadyFilled;
        }
        let fill_value = match validate_fill(fill_price, fill_count) {
            Ok(value) => value,
            Err(reason) => {
                warn!(
                    order_id = %order_id,
                    fill_price,
                    fill_count,
                    reason,
                    "Invalid fill ignored"
                );
                return FillOutcome::InvalidFill {
                    order_id: order_id.to_string(),
                    reason: reason.to_string(),
                };
            }
        };

        let Some(entry) = self.strategies.get_mut(&order.strategy_id) else {
            // Strategies with locked capital cannot be removed, so this only
            // happens for sells whose strategy was removed while in flight.
            warn!(
                order_id = %order_id,
                strategy_id = %order.strategy_id,
                "Fill for removed strategy dropped"
            );
            self.orders.remove(order_id);
            return FillOutcome::UnknownOrder;
        };
        let state = &mut entry.state;

        let mut unlocked = 0;
        let mut refunded = 0;
        let mut proceeds = 0;
        let mut realized = 0;

        match order.action {
            OrderAction::Buy => {
                let covered = fill_count.min(order.remaining());
                if covered < fill_count {
                    warn!(
                        order_id = %order_id,
                        fill_count,
                        remaining = order.remaining(),
                        "Fill exceeds reserved remainder"
                    );
                }

                unlocked = covered * order.price;
                state.locked_in_orders = saturating_release(state.locked_in_orders, unlocked);

                if fill_price < order.price {
                    refunded = (order.price - fill_price) * covered;
                    state.available_cash = state.available_cash.saturating_add(refunded);
                }

                apply_buy_to_position(state, &order, fill_price, fill_count);
            }
            OrderAction::Sell => {
                if let Some(position) = state.positions.get_mut(&order.ticker) {
                    realized = (fill_price - position.avg_cost_basis).saturating_mul(fill_count);
                    state.realized_pnl = state.realized_pnl.saturating_add(realized);
                    position.quantity -= fill_count;
                    if position.quantity <= 0 {
                        state.positions.remove(&order.ticker);
                        debug!(
                            strategy_id = %order.strategy_id,
                            ticker = %order.ticker,
                            "Position closed"
                        );
                    }
                } else {
                    warn!(
                        strategy_id = %order.strategy_id,
                        ticker = %order.ticker,
                        "Sell filled without a matching position"
                    );
                }

                proceeds = fill_value;
                state.available_cash = state.available_cash.saturating_add(proceeds);
            }
        }

        state.fees = state.fees.saturating_add(fee);
        state.orders_filled += 1;
        state.touch();
        state.recompute_unrealized();

        info!(
            strategy_id = %order.strategy_id,
            order_id = %order_id,
            ticker = %order.ticker,
            action = ?order.action,
            fill_price,
            fill_count,
            fee,
            unlocked,
            refunded,
            proceeds,
            realized,
            available_cash = state.available_cash,
            locked_in_orders = state.locked_in_orders,
            "Order filled"
        );

        let strategy_id = order.strategy_id;
        self.orders.record_fill(order_id, fill_count);

        FillOutcome::Applied {
            strategy_id,
            unlocked,
            refunded,
            proceeds,
            realized,
        }
    }

    /// Release the reservation of a cancelled order and stop tracking it.
    pub fn on_order_cancelled(&mut self, order_id: &str) -> CancelOutcome {
        let Some(order) = self.orders.get(order_id) else {
            self.record_unknown_order(order_id, "cancel");
            return CancelOutcome::UnknownOrder;
        };
        if order.is_filled() {
            debug!(order_id = %order_id, "Cancel for completed order ignored");
            return CancelOutcome::AlreadyFilled;
        }

        let Some(order) = self.orders.remove(order_id) else {
            return CancelOutcome::UnknownOrder;
        };
        let released = order.locked_remaining();

        let Some(state) = self.strategies.get_mut(&order.strategy_id).map(|e| &mut e.state)
        else {
            warn!(
                order_id = %order_id,
                strategy_id = %order.strategy_id,
                "Cancel for removed strategy dropped"
            );
            return CancelOutcome::UnknownOrder;
        };

        if released > 0 {
            state.available_cash += released;
            state.locked_in_orders = saturating_release(state.locked_in_orders, released);
        }
        state.orders_cancelled += 1;
        state.touch();

        info!(
            strategy_id = %order.strategy_id,
            order_id = %order_id,
            released,
            available_cash = state.available_cash,
            locked_in_orders = state.locked_in_orders,
            "Order cancelled"
        );

        CancelOutcome::Released {
            strategy_id: order.strategy_id,
            released,
        }
    }

    fn record_unknown_order(&mut self, order_id: &str, event: &str) {
        self.unknown_order_events += 1;
        warn!(
            order_id = %order_id,
            event,
            unknown_order_events = self.unknown_order_events,
            "Event for unknown order ignored"
        );
    }

    // =========================================================================
    // Marking
    // =========================================================================

    /// Mark every open position on `ticker` and refresh unrealized P&L.
    pub fn update_price(&mut self, ticker: &str, price: i64) {
        let mut marked = 0usize;
        for entry in self.strategies.values_mut() {
            if let Some(position) = entry.state.positions.get_mut(ticker) {
                position.current_price = price;
                marked += 1;
            }
            entry.state.recompute_unrealized();
        }

        if marked > 0 {
            debug!(%ticker, price, positions = marked, "Positions marked");
        }
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Read-only projection of the whole ledger.
    pub fn snapshot(&self) -> AllocationSnapshot {
        let strategies: Vec<StrategySnapshot> = self
            .strategies
            .values()
            .map(|e| StrategySnapshot::new(&e.config, &e.state))
            .collect();
        let allocated: i64 = strategies.iter().map(|s| s.allocated_cash).sum();

        AllocationSnapshot {
            total_cash: self.total_cash,
            unallocated_cash: self.total_cash - allocated,
            total_allocation_pct: self.total_allocation(),
            strategies,
            taken_at: Utc::now(),
        }
    }

    /// Projection of a single strategy.
    pub fn strategy_snapshot(&self, id: &str) -> Option<StrategySnapshot> {
        self.strategies
            .get(id)
            .map(|e| StrategySnapshot::new(&e.config, &e.state))
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            strategies: self.strategies.len(),
            open_orders: self.orders.open_count(),
            retained_filled_orders: self.orders.retained_filled_count(),
            unknown_order_events: self.unknown_order_events,
            total_allocation_pct: self.total_allocation(),
        }
    }
}

fn validate_pct(id: &str, pct: Decimal) -> Result<()> {
    if pct < Decimal::ZERO || pct > Decimal::ONE {
        return Err(LedgerError::InvalidAllocation {
            strategy_id: id.to_string(),
            pct,
        });
    }
    Ok(())
}

/// Check a draft and return the capital it reserves.
fn validate_draft(draft: &OrderDraft) -> Result<i64> {
    let reason = if draft.count <= 0 {
        "count must be positive"
    } else if draft.price < 0 {
        "price must not be negative"
    } else if let Some(cost) = draft.reservation_cost() {
        return Ok(cost);
    } else {
        "cost overflows"
    };

    Err(LedgerError::InvalidOrder {
        order_id: draft.order_id.clone(),
        reason: reason.to_string(),
    })
}

/// Check a fill event and return `fill_count × fill_price`.
fn validate_fill(fill_price: i64, fill_count: i64) -> std::result::Result<i64, &'static str> {
    if fill_count <= 0 {
        return Err("fill count must be positive");
    }
    if fill_price < 0 {
        return Err("fill price must not be negative");
    }
    fill_count.checked_mul(fill_price).ok_or("fill value overflows")
}

/// Create or volume-weight the position a buy fill lands in.
fn apply_buy_to_position(
    state: &mut StrategyState,
    order: &TrackedOrder,
    fill_price: i64,
    fill_count: i64,
) {
    match state.positions.get_mut(&order.ticker) {
        Some(position) => {
            if position.side != order.side {
                warn!(
                    strategy_id = %order.strategy_id,
                    ticker = %order.ticker,
                    held = ?position.side,
                    bought = ?order.side,
                    "Buy on opposite side averaged into existing position"
                );
            }
            position.avg_cost_basis = rounded_weighted_average(
                position.avg_cost_basis,
                position.quantity,
                fill_price,
                fill_count,
            );
            position.quantity = position.quantity.saturating_add(fill_count);
        }
        None => {
            state.positions.insert(
                order.ticker.clone(),
                PositionEntry {
                    ticker: order.ticker.clone(),
                    side: order.side,
                    quantity: fill_count,
                    avg_cost_basis: fill_price,
                    current_price: fill_price,
                },
            );
        }
    }
}
