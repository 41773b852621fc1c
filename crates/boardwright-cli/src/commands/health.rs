//! `boardwright health` -- probe every configured provider.

use boardwright_core::{HealthStatus, Orchestrator};
use boardwright_types::config::OrchestratorConfig;

/// Print the health report as JSON. Fails when no provider is usable.
pub async fn run(config: OrchestratorConfig) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(&config);
    let report = orchestrator.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == HealthStatus::Unhealthy {
        anyhow::bail!("no providers configured");
    }
    Ok(())
}
