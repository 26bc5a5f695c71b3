use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tick_replay::data::CsvTickSource;
use tick_replay::replay::ReplayEngine;
use tick_replay::strategy::BuyAndHoldStrategy;
use tick_replay::Config;

#[derive(Parser)]
#[command(
    name = "tick-replay",
    about = "Tick-level futures backtesting with simulated matching and daily mark-to-market PnL"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay tick data through a strategy and report statistics
    Backtest {
        /// Path to the JSON run configuration
        #[arg(short, long)]
        config: String,

        /// Path to the CSV tick data file
        #[arg(short, long)]
        data: String,

        /// Lots for the buy-and-hold demo strategy
        #[arg(long, default_value_t = 1.0)]
        volume: f64,

        /// Write the full report (statistics, daily results, orders,
        /// trades) as JSON
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Backtest {
            config,
            data,
            volume,
            output,
        } => {
            let config = Config::from_file(&config)?;
            let source = CsvTickSource::open(
                &data,
                config.contract.symbol.clone(),
                config.contract.exchange,
            )?;
            let mut engine = ReplayEngine::new(config, source, BuyAndHoldStrategy::new(volume));
            let report = engine.run()?;

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
                info!(path = %path, "report written");
            }
        }
    }
    Ok(())
}
