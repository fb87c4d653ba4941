//! Trade engine binary.
//!
//! Invoked by a scheduler as discrete passes. Exits 0 on a clean pass
//! (a closed market counts as clean), 1 on configuration or unrecoverable
//! failure.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use trade_engine::broker::alpaca::AlpacaGateway;
use trade_engine::engine::SystemClock;
use trade_engine::events::AuditSink;
use trade_engine::quotes::AlpacaQuoteFeed;
use trade_engine::store::JsonStore;
use trade_engine::{Engine, EngineSettings, PassReport};

#[derive(Parser)]
#[command(name = "trade-engine", version, about = "Automated trade execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile against the broker, sweep stale orders, enter candidates.
    Morning,
    /// Poll orders, ratchet stops, run exits, redeploy freed capital.
    Monitor,
    /// Final order sweep and daily summary.
    Eod,
    /// Print a read-only JSON status snapshot.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    trade_engine::telemetry::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Pass failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = EngineSettings::from_env()?;
    info!(
        environment = %settings.alpaca.environment,
        data_dir = %settings.data_dir.display(),
        trading_enabled = settings.trading_enabled,
        "Starting trade engine"
    );

    let broker = Arc::new(AlpacaGateway::new(settings.alpaca.clone())?);
    let quotes = Arc::new(AlpacaQuoteFeed::new(settings.alpaca.clone())?);
    let events = Arc::new(AuditSink::new(JsonStore::open(&settings.data_dir)?));
    let mut engine = Engine::new(&settings, broker, quotes, events, Arc::new(SystemClock))?;

    match cli.command {
        Command::Morning => log_report("morning", &engine.run_morning().await?),
        Command::Monitor => log_report("monitor", &engine.run_monitor().await?),
        Command::Eod => log_report("eod", &engine.run_eod().await?),
        Command::Status => {
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

fn log_report(pass: &str, report: &PassReport) {
    info!(
        pass,
        market_open = report.market_open,
        halted = report.halted,
        entries = report.entries_submitted,
        exits = report.exits_executed,
        queued = report.queued,
        redeployed = report.redeployed,
        fills = report.fills.len(),
        unresolved = report.unresolved_discrepancies,
        "Pass complete"
    );
    for note in &report.notes {
        info!(pass, note, "Pass note");
    }
}
