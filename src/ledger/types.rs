//! Ledger data model: strategy configuration, per-strategy financial state,
//! positions and tracked orders.
//!
//! All cash amounts and prices are `i64` minor currency units (cents).
//! Allocation fractions are `Decimal` in [0, 1].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tolerance applied to the allocation-sum invariant (Σ pct ≤ 1 + ε).
pub const ALLOCATION_EPSILON: Decimal = dec!(0.0001);

/// Identity and policy for one strategy.
///
/// `strategy_type` and `params` are opaque to the ledger: stored, compared
/// structurally, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub strategy_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fraction of total cash assigned to this strategy (0.0-1.0)
    pub allocation_pct: Decimal,
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl StrategyConfig {
    /// Build a config with empty params.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        strategy_type: impl Into<String>,
        allocation_pct: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strategy_type: strategy_type.into(),
            enabled: true,
            allocation_pct,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Field-level diff over the non-financial fields.
    ///
    /// Returns a patch carrying only the fields of `desired` that differ
    /// from `self`. Allocation is handled separately by `reallocate`.
    pub fn diff(&self, desired: &StrategyConfig) -> StrategyConfigPatch {
        StrategyConfigPatch {
            enabled: (self.enabled != desired.enabled).then_some(desired.enabled),
            name: (self.name != desired.name).then(|| desired.name.clone()),
            strategy_type: (self.strategy_type != desired.strategy_type)
                .then(|| desired.strategy_type.clone()),
            params: (self.params != desired.params).then(|| desired.params.clone()),
        }
    }
}

/// Partial update for the non-financial fields of a strategy config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyConfigPatch {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub strategy_type: Option<String>,
    pub params: Option<serde_json::Value>,
}

impl StrategyConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.name.is_none()
            && self.strategy_type.is_none()
            && self.params.is_none()
    }

    /// Names of the fields carried by this patch, for logging.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.enabled.is_some() {
            fields.push("enabled");
        }
        if self.name.is_some() {
            fields.push("name");
        }
        if self.strategy_type.is_some() {
            fields.push("type");
        }
        if self.params.is_some() {
            fields.push("params");
        }
        fields
    }
}

/// Lifecycle status of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Idle,
    Active,
    Paused,
    Error,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Idle => write!(f, "idle"),
            StrategyStatus::Active => write!(f, "active"),
            StrategyStatus::Paused => write!(f, "paused"),
            StrategyStatus::Error => write!(f, "error"),
        }
    }
}

/// One of the two mutually exclusive sides of a binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractSide {
    Yes,
    No,
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

/// Open position for one (strategy, ticker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    pub ticker: String,
    pub side: ContractSide,
    /// Contracts held (> 0 while the entry exists)
    pub quantity: i64,
    /// Volume-weighted average acquisition price
    pub avg_cost_basis: i64,
    /// Latest mark
    pub current_price: i64,
}

impl PositionEntry {
    /// Mark-to-market P&L against the latest price.
    pub fn unrealized_pnl(&self) -> i64 {
        self.current_price
            .saturating_sub(self.avg_cost_basis)
            .saturating_mul(self.quantity)
    }

    /// Capital sunk into the position at cost.
    pub fn cost_basis_value(&self) -> i64 {
        self.avg_cost_basis.saturating_mul(self.quantity)
    }
}

/// Financial state of a strategy. Owned exclusively by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyState {
    pub status: StrategyStatus,
    pub allocated_cash: i64,
    pub available_cash: i64,
    pub locked_in_orders: i64,
    pub positions: HashMap<String, PositionEntry>,
    pub realized_pnl: i64,
    pub unrealized_pnl: i64,
    pub fees: i64,
    pub orders_placed: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl StrategyState {
    /// Fresh state holding its whole allocation as available cash.
    pub fn new(allocated_cash: i64, enabled: bool) -> Self {
        Self {
            status: if enabled {
                StrategyStatus::Idle
            } else {
                StrategyStatus::Paused
            },
            allocated_cash,
            available_cash: allocated_cash,
            locked_in_orders: 0,
            positions: HashMap::new(),
            realized_pnl: 0,
            unrealized_pnl: 0,
            fees: 0,
            orders_placed: 0,
            orders_filled: 0,
            orders_cancelled: 0,
            last_activity_at: None,
            error_count: 0,
            last_error: None,
        }
    }

    /// No open positions and nothing locked in pending orders.
    pub fn is_quiescent(&self) -> bool {
        self.positions.is_empty() && self.locked_in_orders == 0
    }

    /// Move to a new allocation, shifting available cash by the delta.
    ///
    /// Available cash is clamped at zero when the shrink exceeds it.
    /// Returns the signed change in allocated cash.
    pub(crate) fn apply_allocation(&mut self, allocated_cash: i64) -> i64 {
        let delta = allocated_cash - self.allocated_cash;
        self.allocated_cash = allocated_cash;
        self.available_cash = (self.available_cash + delta).max(0);
        delta
    }

    pub(crate) fn recompute_unrealized(&mut self) {
        self.unrealized_pnl = self
            .positions
            .values()
            .map(PositionEntry::unrealized_pnl)
            .fold(0, i64::saturating_add);
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity_at = Some(Utc::now());
    }
}

/// Order details supplied by the caller when reserving capital.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    /// Caller-supplied unique id
    pub order_id: String,
    pub ticker: String,
    pub side: ContractSide,
    pub action: OrderAction,
    pub count: i64,
    /// Price per contract at which capital is reserved
    pub price: i64,
}

impl OrderDraft {
    pub fn buy(
        order_id: impl Into<String>,
        ticker: impl Into<String>,
        side: ContractSide,
        count: i64,
        price: i64,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            ticker: ticker.into(),
            side,
            action: OrderAction::Buy,
            count,
            price,
        }
    }

    pub fn sell(
        order_id: impl Into<String>,
        ticker: impl Into<String>,
        side: ContractSide,
        count: i64,
        price: i64,
    ) -> Self {
        Self {
            action: OrderAction::Sell,
            ..Self::buy(order_id, ticker, side, count, price)
        }
    }

    /// Capital a buy reserves up front. Sells reserve nothing.
    ///
    /// `None` when `count × price` does not fit in an `i64`.
    pub fn reservation_cost(&self) -> Option<i64> {
        match self.action {
            OrderAction::Buy => self.count.checked_mul(self.price),
            OrderAction::Sell => Some(0),
        }
    }
}

/// Lifecycle status of a tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
}

/// Reservation record for an in-flight order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedOrder {
    pub order_id: String,
    pub strategy_id: String,
    pub ticker: String,
    pub side: ContractSide,
    pub action: OrderAction,
    pub count: i64,
    pub filled_count: i64,
    /// Price at which capital was reserved
    pub price: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl TrackedOrder {
    pub fn from_draft(strategy_id: &str, draft: OrderDraft) -> Self {
        Self {
            order_id: draft.order_id,
            strategy_id: strategy_id.to_string(),
            ticker: draft.ticker,
            side: draft.side,
            action: draft.action,
            count: draft.count,
            filled_count: 0,
            price: draft.price,
            status: OrderStatus::Open,
            created_at: Utc::now(),
        }
    }

    /// Contracts not yet filled.
    pub fn remaining(&self) -> i64 {
        (self.count - self.filled_count).max(0)
    }

    /// Capital still locked for the unfilled remainder.
    pub fn locked_remaining(&self) -> i64 {
        match self.action {
            OrderAction::Buy => self.remaining() * self.price,
            OrderAction::Sell => 0,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

/// Result of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Capital locked (zero for sells) and order tracked.
    Reserved { order_id: String, locked: i64 },
    /// Buy cost exceeds available cash. Nothing changed; the caller must not
    /// place the external order.
    InsufficientFunds { required: i64, available: i64 },
}

impl ReserveOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReserveOutcome::Reserved { .. })
    }
}

/// Result of applying a fill event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    Applied {
        strategy_id: String,
        /// Capital moved out of `locked_in_orders`
        unlocked: i64,
        /// Favourable price difference returned to available cash
        refunded: i64,
        /// Sale proceeds credited to available cash
        proceeds: i64,
        /// Realized P&L booked by this fill
        realized: i64,
    },
    /// Order id absent from the tracking table.
    UnknownOrder,
    /// Order already completely filled; duplicate event ignored.
    AlreadyFilled,
    /// Non-positive count, negative price or an overflowing fill value.
    /// Nothing changed.
    InvalidFill { order_id: String, reason: String },
}

/// Result of applying a cancellation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Released { strategy_id: String, released: i64 },
    /// Order id absent from the tracking table.
    UnknownOrder,
    /// Order already completely filled; nothing left to cancel.
    AlreadyFilled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_deserializes_camel_case() {
        let config: StrategyConfig = serde_json::from_value(json!({
            "id": "momo",
            "name": "Momentum",
            "type": "momentum",
            "allocationPct": 0.25,
            "params": {"lookback": 20}
        }))
        .unwrap();

        assert_eq!(config.id, "momo");
        assert_eq!(config.strategy_type, "momentum");
        assert!(config.enabled);
        assert_eq!(config.allocation_pct, dec!(0.25));
        assert_eq!(config.params, json!({"lookback": 20}));
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let config = StrategyConfig::new("a", "A", "mm", dec!(0.2))
            .with_params(json!({"x": 1, "y": [1, 2]}));
        assert!(config.diff(&config.clone()).is_empty());
    }

    #[test]
    fn test_diff_params_key_order_insensitive() {
        let current: serde_json::Value =
            serde_json::from_str(r#"{"spread": 2, "size": 10}"#).unwrap();
        let desired: serde_json::Value =
            serde_json::from_str(r#"{"size": 10, "spread": 2}"#).unwrap();

        let a = StrategyConfig::new("a", "A", "mm", dec!(0.2)).with_params(current);
        let b = StrategyConfig::new("a", "A", "mm", dec!(0.2)).with_params(desired);

        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn test_diff_carries_only_changed_fields() {
        let current = StrategyConfig::new("a", "A", "mm", dec!(0.2));
        let desired = StrategyConfig::new("a", "Renamed", "mm", dec!(0.5)).with_enabled(false);

        let patch = current.diff(&desired);
        assert_eq!(patch.enabled, Some(false));
        assert_eq!(patch.name.as_deref(), Some("Renamed"));
        assert!(patch.strategy_type.is_none());
        assert!(patch.params.is_none());
        assert_eq!(patch.fields(), vec!["enabled", "name"]);
    }

    #[test]
    fn test_state_initial_status() {
        assert_eq!(StrategyState::new(100, true).status, StrategyStatus::Idle);
        assert_eq!(StrategyState::new(100, false).status, StrategyStatus::Paused);
    }

    #[test]
    fn test_apply_allocation_clamps_available() {
        let mut state = StrategyState::new(1_000, true);
        state.available_cash = 200;
        state.locked_in_orders = 800;

        let delta = state.apply_allocation(500);
        assert_eq!(delta, -500);
        assert_eq!(state.allocated_cash, 500);
        assert_eq!(state.available_cash, 0);
        assert_eq!(state.locked_in_orders, 800);
    }

    #[test]
    fn test_reservation_cost() {
        let buy = OrderDraft::buy("o1", "T", ContractSide::Yes, 10, 50);
        let sell = OrderDraft::sell("o2", "T", ContractSide::Yes, 10, 50);
        assert_eq!(buy.reservation_cost(), Some(500));
        assert_eq!(sell.reservation_cost(), Some(0));
        assert_eq!(sell.action, OrderAction::Sell);
    }

    #[test]
    fn test_reservation_cost_overflow() {
        let buy = OrderDraft::buy("o1", "T", ContractSide::Yes, i64::MAX / 2 + 1, 2);
        let sell = OrderDraft::sell("o2", "T", ContractSide::Yes, i64::MAX / 2 + 1, 2);
        assert_eq!(buy.reservation_cost(), None);
        assert_eq!(sell.reservation_cost(), Some(0));
    }

    #[test]
    fn test_unrealized_pnl_saturates() {
        let position = PositionEntry {
            ticker: "T".to_string(),
            side: ContractSide::Yes,
            quantity: i64::MAX / 2,
            avg_cost_basis: 1,
            current_price: 99,
        };
        assert_eq!(position.unrealized_pnl(), i64::MAX);
    }

    #[test]
    fn test_snapshot_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(StrategyStatus::Paused).unwrap(),
            json!("paused")
        );
    }
}
