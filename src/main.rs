//! # Pieces Service Entry Point
//!
//! `pieces serve` runs the HTTP API and the polling scheduler, `pieces migrate`
//! applies database migrations and `pieces list` prints the built-in pieces.

use clap::{Parser, Subcommand};
use pieces::{
    config::ConfigLoader, db, framework::Registry, server::run_server, telemetry::init_tracing,
};
use tracing::info;

/// Connector pieces runtime
#[derive(Debug, Parser)]
#[command(name = "pieces", version, about = "Connector pieces runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API and polling scheduler (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Print the built-in pieces with their actions and triggers
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        info!(config = %redacted_json, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let pool = db::init_pool(&config).await?;
            db::migrate(&pool).await?;
            run_server(config, pool).await
        }
        Command::Migrate => {
            let pool = db::init_pool(&config).await?;
            db::migrate(&pool).await
        }
        Command::List => {
            let registry = Registry::with_builtin_pieces(&config.pieces);
            for piece in registry.list_metadata() {
                println!("{} ({})", piece.name, piece.display_name);
                for action in &piece.actions {
                    println!("  action   {}", action.name);
                }
                for trigger in &piece.triggers {
                    println!(
                        "  trigger  {} [{}]",
                        trigger.name,
                        trigger.strategy.as_str()
                    );
                }
            }
            Ok(())
        }
    }
}
