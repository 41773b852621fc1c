//! `boardwright serve` -- run the HTTP completion API.
//!
//! # Example
//!
//! ```text
//! boardwright serve
//! boardwright serve --bind 0.0.0.0:8080 --config boardwright.json
//! ```

use std::sync::Arc;

use boardwright_core::Orchestrator;
use boardwright_services::api::{self, ApiState};
use boardwright_types::config::OrchestratorConfig;
use clap::Args;
use tracing::{info, warn};

/// Arguments for the `boardwright serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Listen address (overrides `server.bind`).
    #[arg(short, long)]
    pub bind: Option<String>,
}

/// Run the server until Ctrl+C.
pub async fn run(args: ServeArgs, mut config: OrchestratorConfig) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let orchestrator = Arc::new(Orchestrator::from_config(&config));
    info!(adapters = ?orchestrator.adapter_names(), "starting completion api");

    api::serve(ApiState::new(orchestrator), &config.server, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(err) => warn!(error = %err, "failed to listen for ctrl-c"),
    }
}
