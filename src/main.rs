//! # Orderbridge Main Entry Point
//!
//! CLI entry: `serve` runs the HTTP service (plus the scheduler when
//! enabled), `sync` runs exactly one reconciliation pass and prints the
//! summary.

use clap::{Parser, Subcommand};
use orderbridge::{config::ConfigLoader, server::run_server, sync::SyncEngine, telemetry};

#[derive(Parser)]
#[command(name = "orderbridge", version, about = "Trendyol to Airtable order sync service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Run one reconciliation pass and print the JSON summary
    Sync,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Sync => {
            let engine = SyncEngine::from_config(&config)?;
            let summary = engine.run_pass().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}
