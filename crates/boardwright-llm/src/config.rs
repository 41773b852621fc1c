//! Adapter connection settings and built-in model lists.

use std::time::Duration;

use boardwright_types::SecretString;
use boardwright_types::config::ProviderSettings;

/// Models the Anthropic adapter accepts out of the box.
pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-opus-20240229",
    "claude-3-haiku-20240307",
];

/// Models the OpenAI adapter accepts out of the box.
pub const OPENAI_MODELS: &[&str] = &["gpt-4-turbo-preview", "gpt-4", "gpt-3.5-turbo"];

/// How one adapter reaches its provider.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Provider id, reported in responses and logs.
    pub name: String,
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: SecretString,
    /// Transport timeout. A timeout surfaces as a retryable `TIMEOUT`.
    pub timeout: Duration,
    pub models: Vec<String>,
}

impl AdapterConfig {
    pub fn anthropic(settings: &ProviderSettings) -> Self {
        Self::from_settings("anthropic", ANTHROPIC_MODELS, settings)
    }

    pub fn openai(settings: &ProviderSettings) -> Self {
        Self::from_settings("openai", OPENAI_MODELS, settings)
    }

    fn from_settings(name: &str, builtin: &[&str], settings: &ProviderSettings) -> Self {
        let mut models: Vec<String> = builtin.iter().map(|m| m.to_string()).collect();
        for extra in &settings.models {
            if !models.contains(extra) {
                models.push(extra.clone());
            }
        }
        Self {
            name: name.into(),
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            api_key: settings.api_key.clone(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            models,
        }
    }

    /// `{base_url}/{path}`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_defaults() {
        let cfg = AdapterConfig::anthropic(&ProviderSettings::anthropic());
        assert_eq!(cfg.name, "anthropic");
        assert_eq!(cfg.endpoint("messages"), "https://api.anthropic.com/v1/messages");
        assert!(cfg.models.iter().any(|m| m == "claude-3-5-sonnet-20241022"));
        assert_eq!(cfg.timeout, Duration::from_secs(120));
    }

    #[test]
    fn extra_models_are_appended_once() {
        let settings = ProviderSettings {
            models: vec!["gpt-4o".into(), "gpt-4".into()],
            base_url: "http://localhost:9000/v1/".into(),
            ..ProviderSettings::openai()
        };
        let cfg = AdapterConfig::openai(&settings);
        assert_eq!(cfg.models.iter().filter(|m| *m == "gpt-4").count(), 1);
        assert!(cfg.models.iter().any(|m| m == "gpt-4o"));
        assert_eq!(cfg.endpoint("/chat/completions"), "http://localhost:9000/v1/chat/completions");
    }
}
