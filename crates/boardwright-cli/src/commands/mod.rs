//! CLI command implementations for `boardwright`.
//!
//! - [`serve`] -- HTTP API.
//! - [`complete`] -- One-shot completion.
//! - [`health`] -- Provider probes.

pub mod complete;
pub mod health;
pub mod serve;

use std::path::Path;

use boardwright_types::config::OrchestratorConfig;

/// Load configuration from `config_override`, then apply environment
/// overrides. Without a file the built-in defaults are used.
pub async fn load_config(config_override: Option<&str>) -> anyhow::Result<OrchestratorConfig> {
    let base = match config_override {
        Some(path_str) => read_config_file(Path::new(path_str)).await?,
        None => OrchestratorConfig::default(),
    };
    Ok(base.with_env_overrides(|key| std::env::var(key).ok()))
}

async fn read_config_file(path: &Path) -> anyhow::Result<OrchestratorConfig> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read config: {e}"))?;
    serde_json::from_str(&contents).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))
}
