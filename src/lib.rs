//! # Capital Ledger
//!
//! Partitions one pool of cash across independent trading strategies,
//! tracks each strategy's positions and P&L in isolation, and applies live
//! strategy configuration changes without corrupting financial state.
//!
//! ## Architecture
//!
//! - `ledger`: Capital ledger, order lifecycle, snapshots and reconciliation
//! - `config`: Service settings and the desired strategy list
//! - `service`: Keeps a running ledger in sync with the strategies file
//! - `utils`: Integer money arithmetic

pub mod config;
pub mod ledger;
pub mod service;
pub mod utils;

pub use config::Settings;
pub use ledger::{CapitalLedger, Reconciler, SharedLedger};
