//! `boardwright` -- CLI binary for the completion service.
//!
//! Provides the following subcommands:
//!
//! - `boardwright serve` -- Run the HTTP completion API.
//! - `boardwright complete` -- Send one prompt and print the reply.
//! - `boardwright health` -- Probe every configured provider.

use clap::{Parser, Subcommand};

mod commands;

/// boardwright completion service CLI.
#[derive(Parser)]
#[command(name = "boardwright", about = "boardwright completion service CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (JSON). Environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP completion API.
    Serve(commands::serve::ServeArgs),

    /// Send a single prompt.
    Complete(commands::complete::CompleteArgs),

    /// Check provider health.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args, config).await?,
        Commands::Complete(args) => commands::complete::run(args, config).await?,
        Commands::Health => commands::health::run(config).await?,
    }

    Ok(())
}
