//! Reconciliation: diff-apply a desired strategy list onto the ledger.
//!
//! Changes are applied in a fixed order:
//! 1. Add desired ids the ledger does not know
//! 2. Remove ledger ids no longer desired (only quiescent ones succeed)
//! 3. Update ids that existed before step 1: reallocate when the fraction
//!    moved by more than ε, then one `update_config` carrying only the
//!    changed fields
//!
//! Per-entry rejections are logged and collected in the report; they never
//! abort the rest of the batch. Running twice with the same list makes no
//! mutating calls on the second pass.

use super::error::{LedgerError, Result};
use super::shared::SharedLedger;
use super::types::{StrategyConfig, StrategyConfigPatch, ALLOCATION_EPSILON};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// The slice of the ledger contract reconciliation is allowed to use.
#[cfg_attr(test, mockall::automock)]
pub trait StrategyRegistry {
    /// Currently registered configs.
    fn configs(&self) -> Vec<StrategyConfig>;
    fn register_strategy(&self, config: StrategyConfig) -> Result<()>;
    fn remove_strategy(&self, id: &str) -> Result<()>;
    fn reallocate(&self, id: &str, new_pct: Decimal) -> Result<()>;
    fn update_config(&self, id: &str, patch: StrategyConfigPatch) -> Result<()>;
}

impl StrategyRegistry for SharedLedger {
    fn configs(&self) -> Vec<StrategyConfig> {
        SharedLedger::configs(self)
    }

    fn register_strategy(&self, config: StrategyConfig) -> Result<()> {
        SharedLedger::register_strategy(self, config)
    }

    fn remove_strategy(&self, id: &str) -> Result<()> {
        SharedLedger::remove_strategy(self, id)
    }

    fn reallocate(&self, id: &str, new_pct: Decimal) -> Result<()> {
        SharedLedger::reallocate(self, id, new_pct)
    }

    fn update_config(&self, id: &str, patch: StrategyConfigPatch) -> Result<()> {
        SharedLedger::update_config(self, id, patch)
    }
}

/// Kind of ledger call issued by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOp {
    Add,
    Remove,
    Reallocate,
    Update,
}

/// A ledger call that was attempted and rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedChange {
    pub strategy_id: String,
    pub op: ReconcileOp,
    pub error: LedgerError,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub reallocated: Vec<String>,
    pub updated: Vec<String>,
    pub rejected: Vec<RejectedChange>,
}

impl ReconcileReport {
    /// Mutating ledger calls issued, successful or not.
    pub fn calls_issued(&self) -> usize {
        self.added.len()
            + self.removed.len()
            + self.reallocated.len()
            + self.updated.len()
            + self.rejected.len()
    }

    pub fn is_noop(&self) -> bool {
        self.calls_issued() == 0
    }

    fn record(&mut self, id: &str, op: ReconcileOp, result: Result<()>) {
        match result {
            Ok(()) => {
                let applied = match op {
                    ReconcileOp::Add => &mut self.added,
                    ReconcileOp::Remove => &mut self.removed,
                    ReconcileOp::Reallocate => &mut self.reallocated,
                    ReconcileOp::Update => &mut self.updated,
                };
                applied.push(id.to_string());
            }
            Err(error) => {
                warn!(strategy_id = %id, ?op, %error, "Reconcile step rejected");
                self.rejected.push(RejectedChange {
                    strategy_id: id.to_string(),
                    op,
                    error,
                });
            }
        }
    }
}

/// Applies desired strategy lists to a registry.
#[derive(Debug, Clone)]
pub struct Reconciler {
    epsilon: Decimal,
}

impl Reconciler {
    pub fn new(epsilon: Decimal) -> Self {
        Self { epsilon }
    }

    /// Bring `registry` in line with `desired`.
    ///
    /// When an id appears more than once in `desired`, the first occurrence wins.
    pub fn reconcile<R: StrategyRegistry + ?Sized>(
        &self,
        registry: &R,
        desired: &[StrategyConfig],
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let current: HashMap<String, StrategyConfig> = registry
            .configs()
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut seen = HashSet::new();
        let desired: Vec<&StrategyConfig> = desired
            .iter()
            .filter(|c| {
                let first = seen.insert(c.id.as_str());
                if !first {
                    warn!(strategy_id = %c.id, "Duplicate strategy id in desired list ignored");
                }
                first
            })
            .collect();

        debug!(
            current = current.len(),
            desired = desired.len(),
            "Reconciling strategies"
        );

        // 1. Add
        for config in desired.iter().filter(|c| !current.contains_key(&c.id)) {
            let result = registry.register_strategy((*config).clone());
            report.record(&config.id, ReconcileOp::Add, result);
        }

        // 2. Remove
        let mut stale: Vec<&String> = current
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .collect();
        stale.sort();
        for id in stale {
            let result = registry.remove_strategy(id);
            report.record(id, ReconcileOp::Remove, result);
        }

        // 3. Update pre-existing entries
        for want in &desired {
            let Some(have) = current.get(&want.id) else {
                continue;
            };

            if (have.allocation_pct - want.allocation_pct).abs() > self.epsilon {
                let result = registry.reallocate(&want.id, want.allocation_pct);
                report.record(&want.id, ReconcileOp::Reallocate, result);
            }

            let patch = have.diff(want);
            if !patch.is_empty() {
                debug!(strategy_id = %want.id, fields = ?patch.fields(), "Config drift detected");
                let result = registry.update_config(&want.id, patch);
                report.record(&want.id, ReconcileOp::Update, result);
            }
        }

        if report.is_noop() {
            debug!("Strategies already in sync");
        } else {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                reallocated = report.reallocated.len(),
                updated = report.updated.len(),
                rejected = report.rejected.len(),
                "Reconciliation applied"
            );
        }

        report
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ALLOCATION_EPSILON)
    }
}
