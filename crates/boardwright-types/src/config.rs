//! Configuration schema for the completion orchestrator.
//!
//! All structs accept both `snake_case` and `camelCase` keys in JSON via
//! `#[serde(alias)]`, and every field has a default so a partial (or empty)
//! config file is valid. Unknown fields are ignored.
//!
//! Environment overrides use the conventional deployment variables
//! (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `DEFAULT_MODEL`,
//! `FALLBACK_MODEL`, `ENABLE_CACHING`, `ENABLE_STREAMING`, `CACHE_TTL`) and
//! are applied through [`OrchestratorConfig::with_env_overrides`], which
//! takes the lookup function as a parameter.

use serde::{Deserialize, Serialize};

use crate::secret::SecretString;

/// Default primary model.
pub const DEFAULT_PRIMARY_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Default fallback model.
pub const DEFAULT_FALLBACK_MODEL: &str = "gpt-4-turbo-preview";

fn default_true() -> bool {
    true
}

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration, consumed once when the orchestrator is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Provider credentials and endpoints.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Model used when a request does not name one.
    #[serde(default = "default_primary_model", alias = "primaryModel")]
    pub primary_model: String,

    /// Model tried once after the primary call is exhausted.
    #[serde(default = "default_fallback_model", alias = "fallbackModel")]
    pub fallback_model: String,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Streaming settings.
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Retry/backoff settings.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Number of usage-metric records kept for aggregate statistics.
    #[serde(default = "default_metrics_window", alias = "metricsWindow")]
    pub metrics_window: usize,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_primary_model() -> String {
    DEFAULT_PRIMARY_MODEL.into()
}

fn default_fallback_model() -> String {
    DEFAULT_FALLBACK_MODEL.into()
}

fn default_metrics_window() -> usize {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            primary_model: default_primary_model(),
            fallback_model: default_fallback_model(),
            cache: CacheConfig::default(),
            streaming: StreamingConfig::default(),
            retry: RetrySettings::default(),
            metrics_window: default_metrics_window(),
            server: ServerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Default config with overrides read from the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply environment-style overrides using `lookup` to read variables.
    ///
    /// API keys are only filled from the environment when the config file
    /// did not set one. Model and feature flags always take the
    /// environment value when present.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for settings in [&mut self.providers.anthropic, &mut self.providers.openai] {
            if settings.api_key.is_empty()
                && let Some(key) = lookup(&settings.api_key_env)
            {
                settings.api_key = SecretString::new(key);
            }
        }

        if let Some(model) = lookup("DEFAULT_MODEL").filter(|m| !m.trim().is_empty()) {
            self.primary_model = model;
        }
        if let Some(model) = lookup("FALLBACK_MODEL").filter(|m| !m.trim().is_empty()) {
            self.fallback_model = model;
        }
        if let Some(flag) = lookup("ENABLE_CACHING") {
            self.cache.enabled = flag != "false";
        }
        if let Some(flag) = lookup("ENABLE_STREAMING") {
            self.streaming.enabled = flag != "false";
        }
        if let Some(ttl) = lookup("CACHE_TTL").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.cache.ttl_secs = ttl;
        }
        self
    }
}

// ── Providers ────────────────────────────────────────────────────────────

/// Per-provider settings for the two built-in backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Anthropic Messages API.
    #[serde(default = "ProviderSettings::anthropic")]
    pub anthropic: ProviderSettings,

    /// OpenAI Chat Completions API.
    #[serde(default = "ProviderSettings::openai")]
    pub openai: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            anthropic: ProviderSettings::anthropic(),
            openai: ProviderSettings::openai(),
        }
    }
}

/// Connection settings for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Explicit API key. Empty means "read `api_key_env`".
    #[serde(default, alias = "apiKey")]
    pub api_key: SecretString,

    /// Environment variable holding the API key.
    #[serde(default, alias = "apiKeyEnv")]
    pub api_key_env: String,

    /// API base URL (no trailing endpoint path).
    #[serde(default, alias = "baseUrl")]
    pub base_url: String,

    /// Transport timeout in seconds.
    #[serde(default = "default_timeout_secs", alias = "timeoutSecs")]
    pub timeout_secs: u64,

    /// Additional model ids this provider should accept.
    #[serde(default)]
    pub models: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderSettings {
    /// Built-in Anthropic settings.
    pub fn anthropic() -> Self {
        Self {
            api_key: SecretString::default(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            base_url: "https://api.anthropic.com/v1".into(),
            timeout_secs: default_timeout_secs(),
            models: Vec::new(),
        }
    }

    /// Built-in OpenAI settings.
    pub fn openai() -> Self {
        Self {
            api_key: SecretString::default(),
            api_key_env: "OPENAI_API_KEY".into(),
            base_url: "https://api.openai.com/v1".into(),
            timeout_secs: default_timeout_secs(),
            models: Vec::new(),
        }
    }

    /// Returns `true` when an API key is available.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ── Cache ────────────────────────────────────────────────────────────────

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether blocking completions are cached.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Store-wide time-to-live in seconds.
    #[serde(default = "default_cache_ttl", alias = "ttlSecs")]
    pub ttl_secs: u64,

    /// Maximum number of entries before LRU eviction.
    #[serde(default = "default_cache_max_entries", alias = "maxEntries")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
        }
    }
}

// ── Streaming ────────────────────────────────────────────────────────────

/// Streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// When false, streaming calls degrade to a single blocking completion.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Retry/backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms", alias = "initialDelayMs")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms", alias = "maxDelayMs")]
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt.
    #[serde(default = "default_backoff_multiplier", alias = "backoffMultiplier")]
    pub backoff_multiplier: f64,

    /// Tokens that mark an error retryable when found in its code or message.
    #[serde(default = "default_retryable_codes", alias = "retryableErrorCodes")]
    pub retryable_codes: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// The default retryable error tokens.
pub fn default_retryable_codes() -> Vec<String> {
    [
        "RATE_LIMIT",
        "TIMEOUT",
        "SERVICE_UNAVAILABLE",
        "NETWORK_ERROR",
        "429",
        "503",
        "504",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_codes: default_retryable_codes(),
        }
    }
}

// ── Server ───────────────────────────────────────────────────────────────

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Allowed CORS origins. Empty means permissive.
    #[serde(default, alias = "corsOrigins")]
    pub cors_origins: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:3000".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_deployment_conventions() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.primary_model, "claude-3-5-sonnet-20241022");
        assert_eq!(cfg.fallback_model, "gpt-4-turbo-preview");
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.cache.max_entries, 1000);
        assert!(cfg.streaming.enabled);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.initial_delay_ms, 1000);
        assert_eq!(cfg.retry.max_delay_ms, 30_000);
        assert_eq!(cfg.retry.retryable_codes.len(), 7);
        assert_eq!(cfg.metrics_window, 1000);
        assert!(!cfg.providers.anthropic.is_configured());
        assert!(!cfg.providers.openai.is_configured());
    }

    #[test]
    fn empty_json_is_a_valid_config() {
        let cfg: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.primary_model, DEFAULT_PRIMARY_MODEL);
        assert_eq!(cfg.providers.openai.api_key_env, "OPENAI_API_KEY");
        assert_eq!(cfg.providers.anthropic.base_url, "https://api.anthropic.com/v1");
    }

    #[test]
    fn camel_case_aliases() {
        let json = r#"{
            "primaryModel": "gpt-4",
            "fallbackModel": "gpt-3.5-turbo",
            "cache": {"ttlSecs": 60, "maxEntries": 5},
            "retry": {"maxRetries": 1, "initialDelayMs": 10},
            "providers": {"openai": {"apiKey": "sk-x", "baseUrl": "http://localhost:9"}}
        }"#;
        let cfg: OrchestratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.primary_model, "gpt-4");
        assert_eq!(cfg.fallback_model, "gpt-3.5-turbo");
        assert_eq!(cfg.cache.ttl_secs, 60);
        assert_eq!(cfg.cache.max_entries, 5);
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.max_delay_ms, 30_000);
        assert_eq!(cfg.providers.openai.api_key.expose(), "sk-x");
        assert_eq!(cfg.providers.openai.base_url, "http://localhost:9");
        // Untouched provider keeps its built-in defaults.
        assert_eq!(cfg.providers.anthropic.api_key_env, "ANTHROPIC_API_KEY");
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = OrchestratorConfig::default().with_env_overrides(env(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("DEFAULT_MODEL", "gpt-4"),
            ("FALLBACK_MODEL", "gpt-3.5-turbo"),
            ("ENABLE_CACHING", "false"),
            ("ENABLE_STREAMING", "yes"),
            ("CACHE_TTL", "120"),
        ]));
        assert_eq!(cfg.providers.anthropic.api_key.expose(), "sk-ant");
        assert!(!cfg.providers.openai.is_configured());
        assert_eq!(cfg.primary_model, "gpt-4");
        assert_eq!(cfg.fallback_model, "gpt-3.5-turbo");
        assert!(!cfg.cache.enabled);
        assert!(cfg.streaming.enabled);
        assert_eq!(cfg.cache.ttl_secs, 120);
    }

    #[test]
    fn explicit_key_wins_over_env() {
        let mut cfg = OrchestratorConfig::default();
        cfg.providers.openai.api_key = SecretString::new("from-file");
        let cfg = cfg.with_env_overrides(env(&[("OPENAI_API_KEY", "from-env")]));
        assert_eq!(cfg.providers.openai.api_key.expose(), "from-file");
    }

    #[test]
    fn bad_cache_ttl_is_ignored() {
        let cfg = OrchestratorConfig::default().with_env_overrides(env(&[("CACHE_TTL", "soon")]));
        assert_eq!(cfg.cache.ttl_secs, 3600);
    }

    #[test]
    fn serialized_config_hides_keys() {
        let mut cfg = OrchestratorConfig::default();
        cfg.providers.anthropic.api_key = SecretString::new("sk-ant-secret");
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("sk-ant-secret"));
    }
}
