//! Capital Ledger - Main Entry Point
//!
//! Runs the ledger against a hot-reloaded strategies file, or dry-runs a
//! strategies file against a fresh ledger.

use anyhow::{Context, Result};
use capital_ledger::config::{load_desired, Settings};
use capital_ledger::ledger::{Reconciler, SharedLedger};
use capital_ledger::service::{log_summary, LedgerService};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Capital Ledger CLI
#[derive(Parser)]
#[command(name = "capital-ledger")]
#[command(version, about = "Per-strategy capital allocation ledger")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep a ledger in sync with the strategies file until Ctrl-C
    Run,

    /// Apply a strategies file to an empty ledger and print the resulting allocation
    Check {
        /// Path to the strategies JSON file
        #[arg(short, long)]
        file: String,

        /// Total cash in minor units
        #[arg(short, long, default_value = "100000")]
        cash: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check { file, cash }) => check(&file, cash),
        Some(Commands::Run) | None => run().await,
    }
}

async fn run() -> Result<()> {
    let settings = Settings::load()?;
    settings.validate()?;

    init_logging(&settings)?;

    info!("Capital Ledger v{} starting", env!("CARGO_PKG_VERSION"));
    log_config(&settings);

    let service = LedgerService::new(&settings);
    let ledger = service.ledger();

    match service.reload() {
        Ok(_) => log_summary(&ledger),
        Err(e) => warn!(error = %e, "Initial strategies load failed, starting empty"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker = tokio::spawn(async move { service.run(shutdown_rx).await });

    let interrupted = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            true
        }
        finished = &mut worker => {
            finished.context("Ledger service task failed")??;
            false
        }
    };

    if interrupted {
        info!("Shutdown requested");
        shutdown_tx.send(true).ok();
        worker.await.context("Ledger service task failed")??;
    }

    log_summary(&ledger);
    Ok(())
}

fn check(file: &str, cash: i64) -> Result<()> {
    let desired = load_desired(file)?;
    let ledger = SharedLedger::new(cash);
    let report = Reconciler::default().reconcile(&ledger, &desired);

    for rejected in &report.rejected {
        eprintln!("rejected {}: {}", rejected.strategy_id, rejected.error);
    }

    let snapshot = ledger.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    anyhow::ensure!(
        report.rejected.is_empty(),
        "{} strategies could not be admitted",
        report.rejected.len()
    );
    Ok(())
}

/// Initialize logging to stdout and hourly rolling files.
fn init_logging(settings: &Settings) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(&settings.logging.directory)?;

    let file_appender = tracing_appender::rolling::hourly(
        &settings.logging.directory,
        &settings.logging.file_prefix,
    );
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("capital_ledger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(settings: &Settings) {
    info!("Configuration:");
    info!("   Initial Total Cash: {}", settings.ledger.initial_total_cash);
    info!(
        "   Allocation Tolerance: {:.2}%",
        settings.ledger.allocation_epsilon * dec!(100)
    );
    info!(
        "   Filled Order Retention: {}",
        settings.ledger.filled_order_retention
    );
    info!("   Strategies File: {}", settings.strategies.path);
    info!("   Reload Debounce: {}ms", settings.strategies.debounce_ms);
}
