//! Configuration management for the capital ledger service.
//!
//! Service settings come from an optional `ledger.{toml,json,yaml}` file and
//! `LEDGER__*` environment variables. The desired strategy list lives in its
//! own JSON file (see [`strategies`]) so it can be edited and reloaded while
//! the service runs.

pub mod strategies;

use crate::ledger::{LedgerOptions, ALLOCATION_EPSILON, DEFAULT_FILLED_ORDER_RETENTION};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use strategies::{load_desired, parse_desired, validate_desired, StrategyFileWatcher};

/// Main service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Ledger sizing and tolerances
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Where the desired strategy list is read from
    #[serde(default)]
    pub strategies: StrategySourceSettings,
    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Total cash (minor units) until the balance feed reports otherwise
    #[serde(default)]
    pub initial_total_cash: i64,
    /// Tolerance on the allocation sum (Σ pct ≤ 1 + ε)
    #[serde(default = "default_allocation_epsilon")]
    pub allocation_epsilon: Decimal,
    /// Completely filled orders kept for duplicate-fill detection
    #[serde(default = "default_filled_order_retention")]
    pub filled_order_retention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySourceSettings {
    /// Path to the strategies JSON file
    #[serde(default = "default_strategies_path")]
    pub path: String,
    /// Quiet period (ms) before a burst of file changes triggers a reload
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Directory for rolling log files
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// File name prefix for rolling log files
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_allocation_epsilon() -> Decimal {
    ALLOCATION_EPSILON // 0.0001
}

fn default_filled_order_retention() -> usize {
    DEFAULT_FILLED_ORDER_RETENTION
}

fn default_strategies_path() -> String {
    "strategies.json".to_string()
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_file_prefix() -> String {
    "capital-ledger.log".to_string()
}

impl Settings {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("ledger").required(false))
            .add_source(config::Environment::default().separator("__").prefix("LEDGER"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.ledger.initial_total_cash >= 0,
            "initial_total_cash must not be negative"
        );

        anyhow::ensure!(
            self.ledger.allocation_epsilon >= Decimal::ZERO
                && self.ledger.allocation_epsilon < Decimal::new(1, 2),
            "allocation_epsilon must be between 0 and 0.01"
        );

        anyhow::ensure!(
            self.strategies.debounce_ms >= 10,
            "debounce_ms must be at least 10"
        );

        anyhow::ensure!(
            !self.strategies.path.trim().is_empty(),
            "strategies path must not be empty"
        );

        Ok(())
    }

    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            allocation_epsilon: self.ledger.allocation_epsilon,
            filled_order_retention: self.ledger.filled_order_retention,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.strategies.debounce_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ledger: LedgerSettings::default(),
            strategies: StrategySourceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            initial_total_cash: 0,
            allocation_epsilon: default_allocation_epsilon(),
            filled_order_retention: default_filled_order_retention(),
        }
    }
}

impl Default for StrategySourceSettings {
    fn default() -> Self {
        Self {
            path: default_strategies_path(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.ledger.allocation_epsilon, dec!(0.0001));
        assert_eq!(settings.debounce(), Duration::from_secs(2));
    }

    #[test]
    fn test_negative_cash_rejected() {
        let mut settings = Settings::default();
        settings.ledger.initial_total_cash = -1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_oversized_epsilon_rejected() {
        let mut settings = Settings::default();
        settings.ledger.allocation_epsilon = dec!(0.05);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_settings() {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [ledger]
                initial_total_cash = 250000

                [strategies]
                path = "conf/strategies.json"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.ledger.initial_total_cash, 250_000);
        assert_eq!(settings.ledger.filled_order_retention, 1000);
        assert_eq!(settings.strategies.path, "conf/strategies.json");
        assert_eq!(settings.strategies.debounce_ms, 2000);
        assert_eq!(settings.logging.directory, "logs");

        let options = settings.ledger_options();
        assert_eq!(options.allocation_epsilon, dec!(0.0001));
    }
}
