//! Keeps a ledger in sync with the strategies file while the process runs.

use crate::config::{load_desired, Settings, StrategyFileWatcher};
use crate::ledger::{ReconcileReport, Reconciler, SharedLedger};
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

/// Owns the shared ledger and re-applies the strategies file on change.
pub struct LedgerService {
    ledger: SharedLedger,
    reconciler: Reconciler,
    strategies_path: PathBuf,
    debounce: Duration,
}

impl LedgerService {
    pub fn new(settings: &Settings) -> Self {
        let options = settings.ledger_options();
        let reconciler = Reconciler::new(options.allocation_epsilon);
        let ledger = SharedLedger::with_options(settings.ledger.initial_total_cash, options);

        Self {
            ledger,
            reconciler,
            strategies_path: PathBuf::from(&settings.strategies.path),
            debounce: settings.debounce(),
        }
    }

    /// Handle for feeds, order placement and display.
    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    /// Load the strategies file and reconcile the ledger against it.
    ///
    /// A missing or invalid file leaves the ledger untouched.
    pub fn reload(&self) -> Result<ReconcileReport> {
        let desired = load_desired(&self.strategies_path)?;
        Ok(self.reconciler.reconcile(&self.ledger, &desired))
    }

    /// Reconcile after every debounced change of the strategies file until
    /// `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, mut changes) = mpsc::channel(1);
        let _watcher = StrategyFileWatcher::start(&self.strategies_path, self.debounce, tx)?;

        loop {
            tokio::select! {
                Some(()) = changes.recv() => {
                    info!(path = ?self.strategies_path, "Strategies file changed, reconciling");
                    match self.reload() {
                        Ok(report) if !report.is_noop() => log_summary(&self.ledger),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Strategies reload failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Ledger service stopping");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Log a one-line-per-strategy summary of the ledger.
pub fn log_summary(ledger: &SharedLedger) {
    let snapshot = ledger.snapshot();
    info!(
        total_cash = snapshot.total_cash,
        unallocated_cash = snapshot.unallocated_cash,
        allocation = %snapshot.total_allocation_pct,
        strategies = snapshot.strategies.len(),
        "Ledger snapshot"
    );
    for s in &snapshot.strategies {
        info!(
            strategy_id = %s.id,
            status = %s.status,
            pct = %s.allocation_pct,
            allocated = s.allocated_cash,
            available = s.available_cash,
            locked = s.locked_in_orders,
            positions = s.position_count,
            net_pnl = s.net_pnl(),
            "   strategy"
        );
    }
}
