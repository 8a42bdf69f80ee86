//! Capital ledger for multi-strategy trading.
//!
//! Contains:
//! - The data model shared by every collaborator
//! - `CapitalLedger`: allocation math, order lifecycle, marking, snapshots
//! - `SharedLedger`: the lock-guarded handle passed to feeds and callers
//! - `Reconciler`: diff-applies desired strategy configs at runtime

mod allocator;
mod error;
mod orders;
mod reconcile;
mod shared;
mod snapshot;
mod types;

pub use allocator::{CapitalLedger, LedgerOptions};
pub use error::{LedgerError, Result};
pub use orders::{OrderBook, DEFAULT_FILLED_ORDER_RETENTION};
pub use reconcile::{
    ReconcileOp, ReconcileReport, Reconciler, RejectedChange, StrategyRegistry,
};
pub use shared::SharedLedger;
pub use snapshot::{AllocationSnapshot, LedgerStats, StrategySnapshot};
pub use types::*;
