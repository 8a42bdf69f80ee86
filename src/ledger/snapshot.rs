//! Read-only projections of the ledger for display consumers.

use super::types::{PositionEntry, StrategyConfig, StrategyState, StrategyStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Point-in-time view of the whole ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSnapshot {
    pub total_cash: i64,
    /// `total_cash − Σ allocated_cash` (the reserve)
    pub unallocated_cash: i64,
    pub total_allocation_pct: Decimal,
    pub strategies: Vec<StrategySnapshot>,
    pub taken_at: DateTime<Utc>,
}

impl AllocationSnapshot {
    pub fn strategy(&self, id: &str) -> Option<&StrategySnapshot> {
        self.strategies.iter().find(|s| s.id == id)
    }

    /// Realized + unrealized − fees across all strategies.
    pub fn net_pnl(&self) -> i64 {
        self.strategies.iter().map(StrategySnapshot::net_pnl).sum()
    }
}

/// Config, state and positions of one strategy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySnapshot {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub enabled: bool,
    pub allocation_pct: Decimal,
    pub params: serde_json::Value,
    pub status: StrategyStatus,
    pub allocated_cash: i64,
    pub available_cash: i64,
    pub locked_in_orders: i64,
    pub realized_pnl: i64,
    pub unrealized_pnl: i64,
    pub fees: i64,
    pub position_count: usize,
    pub positions: Vec<PositionEntry>,
    pub orders_placed: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl StrategySnapshot {
    pub(crate) fn new(config: &StrategyConfig, state: &StrategyState) -> Self {
        let mut positions: Vec<PositionEntry> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));

        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            strategy_type: config.strategy_type.clone(),
            enabled: config.enabled,
            allocation_pct: config.allocation_pct,
            params: config.params.clone(),
            status: state.status,
            allocated_cash: state.allocated_cash,
            available_cash: state.available_cash,
            locked_in_orders: state.locked_in_orders,
            realized_pnl: state.realized_pnl,
            unrealized_pnl: state.unrealized_pnl,
            fees: state.fees,
            position_count: positions.len(),
            positions,
            orders_placed: state.orders_placed,
            orders_filled: state.orders_filled,
            orders_cancelled: state.orders_cancelled,
            last_activity_at: state.last_activity_at,
            error_count: state.error_count,
            last_error: state.last_error.clone(),
        }
    }

    pub fn net_pnl(&self) -> i64 {
        self.realized_pnl + self.unrealized_pnl - self.fees
    }

    /// Capital currently committed at cost in open positions.
    pub fn cost_basis_value(&self) -> i64 {
        self.positions.iter().map(PositionEntry::cost_basis_value).sum()
    }
}

/// Ledger-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub strategies: usize,
    pub open_orders: usize,
    pub retained_filled_orders: usize,
    /// Fill/cancel events that referenced an untracked order
    pub unknown_order_events: u64,
    pub total_allocation_pct: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::ContractSide;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn snapshot_with_position() -> StrategySnapshot {
        let config = StrategyConfig::new("a", "Alpha", "mm", dec!(0.3));
        let mut state = StrategyState::new(30_000, true);
        state.positions.insert(
            "T".to_string(),
            PositionEntry {
                ticker: "T".to_string(),
                side: ContractSide::No,
                quantity: 10,
                avg_cost_basis: 45,
                current_price: 60,
            },
        );
        state.recompute_unrealized();
        state.realized_pnl = 100;
        state.fees = 7;
        StrategySnapshot::new(&config, &state)
    }

    #[test]
    fn test_strategy_snapshot_fields() {
        let snapshot = snapshot_with_position();
        assert_eq!(snapshot.position_count, 1);
        assert_eq!(snapshot.unrealized_pnl, 150);
        assert_eq!(snapshot.net_pnl(), 243);
        assert_eq!(snapshot.cost_basis_value(), 450);
    }

    #[test]
    fn test_snapshot_serializes_display_shape() {
        let value = serde_json::to_value(snapshot_with_position()).unwrap();

        assert_eq!(value["id"], json!("a"));
        assert_eq!(value["type"], json!("mm"));
        assert_eq!(value["allocatedCash"], json!(30_000));
        assert_eq!(value["lockedInOrders"], json!(0));
        assert_eq!(value["positionCount"], json!(1));
        assert_eq!(value["status"], json!("idle"));
        assert_eq!(value["positions"][0]["avgCostBasis"], json!(45));
        assert_eq!(value["positions"][0]["side"], json!("no"));
    }
}
