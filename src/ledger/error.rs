//! Ledger error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Rejections raised by ledger operations.
///
/// Every variant is returned before any state is touched, so a rejected
/// operation leaves the ledger exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A strategy with the same id is already registered.
    #[error("strategy already registered: {0}")]
    DuplicateStrategy(String),

    /// Admitting the requested fraction would push the pool past 100%.
    #[error(
        "allocation exceeded for {strategy_id}: requested {requested}, \
         committed elsewhere {committed}, limit {limit}"
    )]
    AllocationExceeded {
        strategy_id: String,
        requested: Decimal,
        committed: Decimal,
        limit: Decimal,
    },

    /// Allocation fraction outside [0, 1].
    #[error("invalid allocation for {strategy_id}: {pct} is not within [0, 1]")]
    InvalidAllocation { strategy_id: String, pct: Decimal },

    /// No strategy registered under this id.
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    /// Order id already present in the tracking table.
    #[error("order already tracked: {0}")]
    DuplicateOrder(String),

    /// Order draft with a non-positive count or a negative price.
    #[error("invalid order {order_id}: {reason}")]
    InvalidOrder { order_id: String, reason: String },

    /// Strategy still holds positions or capital locked in orders.
    #[error(
        "cannot remove {strategy_id}: {open_positions} open positions, \
         {locked_in_orders} locked in orders"
    )]
    RemovalBlocked {
        strategy_id: String,
        open_positions: usize,
        locked_in_orders: i64,
    },
}

impl LedgerError {
    /// True for rejections caused by the allocation-sum invariant or a bad
    /// fraction (the admission family).
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            LedgerError::DuplicateStrategy(_)
                | LedgerError::AllocationExceeded { .. }
                | LedgerError::InvalidAllocation { .. }
        )
    }
}
