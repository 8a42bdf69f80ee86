//! End-to-end walk through a two-strategy session on one cash pool.

use capital_ledger::ledger::{
    CancelOutcome, ContractSide, FillOutcome, LedgerError, OrderDraft, Reconciler,
    ReserveOutcome, SharedLedger, StrategyConfig, StrategyStatus,
};
use rust_decimal_macros::dec;
use serde_json::json;

const TICKER: &str = "KXFED-25DEC-T4.00";

fn strategy(id: &str, pct: rust_decimal::Decimal) -> StrategyConfig {
    StrategyConfig::new(id, id.to_uppercase(), "market_maker", pct)
}

#[test]
fn test_full_session_accounting() {
    let ledger = SharedLedger::new(100_000);

    ledger.register_strategy(strategy("a", dec!(0.3))).unwrap();
    ledger.register_strategy(strategy("b", dec!(0.5))).unwrap();

    let snapshot = ledger.snapshot();
    assert_eq!(snapshot.strategy("a").unwrap().allocated_cash, 30_000);
    assert_eq!(snapshot.strategy("b").unwrap().allocated_cash, 50_000);
    assert_eq!(snapshot.unallocated_cash, 20_000);

    let err = ledger.register_strategy(strategy("c", dec!(0.3))).unwrap_err();
    assert!(matches!(err, LedgerError::AllocationExceeded { .. }));
    assert!(ledger.strategy_snapshot("c").is_none());

    // Buy 10 @ 50
    let outcome = ledger
        .reserve_for_order("a", OrderDraft::buy("a-1", TICKER, ContractSide::Yes, 10, 50))
        .unwrap();
    assert!(outcome.is_reserved());
    let a = ledger.strategy_snapshot("a").unwrap();
    assert_eq!(a.available_cash, 29_500);
    assert_eq!(a.locked_in_orders, 500);

    // Filled at 45 with a 5 fee
    let fill = ledger.on_order_filled("a-1", 45, 10, 5);
    assert!(matches!(
        fill,
        FillOutcome::Applied { unlocked: 500, refunded: 50, .. }
    ));
    let a = ledger.strategy_snapshot("a").unwrap();
    assert_eq!(a.available_cash, 29_550);
    assert_eq!(a.locked_in_orders, 0);
    assert_eq!(a.fees, 5);
    assert_eq!(a.position_count, 1);
    assert_eq!(a.positions[0].quantity, 10);
    assert_eq!(a.positions[0].avg_cost_basis, 45);

    // Mark at 60
    ledger.update_price(TICKER, 60);
    assert_eq!(ledger.strategy_snapshot("a").unwrap().unrealized_pnl, 150);

    // Sell everything at 70
    ledger
        .reserve_for_order("a", OrderDraft::sell("a-2", TICKER, ContractSide::Yes, 10, 70))
        .unwrap();
    ledger.on_order_filled("a-2", 70, 10, 0);

    let a = ledger.strategy_snapshot("a").unwrap();
    assert_eq!(a.realized_pnl, 250);
    assert_eq!(a.position_count, 0);
    assert_eq!(a.unrealized_pnl, 0);
    assert_eq!(a.available_cash, 29_550 + 700);
    assert_eq!(a.orders_placed, 2);
    assert_eq!(a.orders_filled, 2);

    // B untouched throughout
    let b = ledger.strategy_snapshot("b").unwrap();
    assert_eq!(b.available_cash, 50_000);
    assert_eq!(b.status, StrategyStatus::Idle);
}

#[test]
fn test_failed_placement_releases_reservation() {
    let ledger = SharedLedger::new(100_000);
    ledger.register_strategy(strategy("a", dec!(0.2))).unwrap();

    // 20_000 available: the first order fits, the second no longer does
    let first = ledger
        .reserve_for_order("a", OrderDraft::buy("a-1", TICKER, ContractSide::No, 100, 150))
        .unwrap();
    assert!(first.is_reserved());

    let second = ledger
        .reserve_for_order("a", OrderDraft::buy("a-2", TICKER, ContractSide::No, 100, 60))
        .unwrap();
    assert_eq!(
        second,
        ReserveOutcome::InsufficientFunds {
            required: 6_000,
            available: 5_000,
        }
    );

    // Exchange refused the first order: the caller cancels the reservation
    ledger.on_order_cancelled("a-1");

    let a = ledger.strategy_snapshot("a").unwrap();
    assert_eq!(a.available_cash, 20_000);
    assert_eq!(a.locked_in_orders, 0);
    assert_eq!(a.orders_placed, 1);
    assert_eq!(a.orders_cancelled, 1);
    assert!(ledger.open_orders("a").is_empty());
}

#[test]
fn test_live_reconfiguration_keeps_books_intact() {
    let ledger = SharedLedger::new(100_000);
    let reconciler = Reconciler::default();

    let v1 = vec![
        strategy("a", dec!(0.3)).with_params(json!({"spread": 2})),
        strategy("b", dec!(0.5)),
    ];
    let report = reconciler.reconcile(&ledger, &v1);
    assert_eq!(report.added, vec!["a", "b"]);

    // A opens a position, B is idle
    ledger
        .reserve_for_order("a", OrderDraft::buy("a-1", TICKER, ContractSide::Yes, 100, 40))
        .unwrap();
    ledger.on_order_filled("a-1", 40, 100, 10);

    // v2 drops A and B and adds C
    let v2 = vec![strategy("c", dec!(0.2))];
    let report = reconciler.reconcile(&ledger, &v2);
    assert_eq!(report.added, vec!["c"]);
    assert_eq!(report.removed, vec!["b"]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].strategy_id, "a");

    let a = ledger.strategy_snapshot("a").unwrap();
    assert_eq!(a.position_count, 1);
    assert_eq!(a.available_cash, 26_000);

    // Same list again: A is still blocked, so only its removal is retried
    let again = reconciler.reconcile(&ledger, &v2);
    assert_eq!(again.calls_issued(), 1);
    assert!(again.added.is_empty());

    // Flatten A, then the pending removal goes through
    ledger
        .reserve_for_order("a", OrderDraft::sell("a-2", TICKER, ContractSide::Yes, 100, 55))
        .unwrap();
    ledger.on_order_filled("a-2", 55, 100, 10);
    let report = reconciler.reconcile(&ledger, &v2);
    assert_eq!(report.removed, vec!["a"]);

    let settled = reconciler.reconcile(&ledger, &v2);
    assert!(settled.is_noop());
    assert_eq!(ledger.snapshot().unallocated_cash, 80_000);
}

#[test]
fn test_racing_fill_and_cancel() {
    let ledger = SharedLedger::new(100_000);
    ledger.register_strategy(strategy("a", dec!(0.3))).unwrap();
    ledger
        .reserve_for_order("a", OrderDraft::buy("a-1", TICKER, ContractSide::Yes, 10, 50))
        .unwrap();

    // Cancel wins the race; the late fill is an unknown order
    assert!(matches!(
        ledger.on_order_cancelled("a-1"),
        CancelOutcome::Released { released: 500, .. }
    ));
    assert_eq!(ledger.on_order_filled("a-1", 50, 10, 0), FillOutcome::UnknownOrder);

    let a = ledger.strategy_snapshot("a").unwrap();
    assert_eq!(a.available_cash, 30_000);
    assert_eq!(a.locked_in_orders, 0);
    assert_eq!(a.position_count, 0);
    assert_eq!(ledger.stats().unknown_order_events, 1);
}
