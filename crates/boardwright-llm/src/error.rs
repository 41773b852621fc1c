//! Error types for boardwright-llm.
//!
//! Adapters work with [`ProviderError`] internally (transport and protocol
//! failures as they happen) and hand the orchestrator a [`ModelError`], the
//! normalized classification every caller above the adapter sees. The
//! conversion lives in [`ModelError::from_provider`].

use std::fmt;

use thiserror::Error;

/// Native failures raised while talking to a provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-success HTTP status that has no more specific variant.
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    /// The provider returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// Authentication with the provider was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The provider refused the content on policy grounds.
    #[error("content filtered: {0}")]
    ContentFiltered(String),

    /// The adapter has no API key.
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The provider returned a response that could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request timed out.
    #[error("timeout")]
    Timeout,

    /// The stream consumer went away before the stream finished.
    #[error("stream receiver dropped")]
    Cancelled,

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classification of a [`ModelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Validation,
    RateLimit,
    ServiceUnavailable,
    Timeout,
    NetworkError,
    ContentFilter,
    Configuration,
    Auth,
    InvalidResponse,
    Cancelled,
    /// Any other non-success status.
    Http(u16),
    Unknown,
}

impl ErrorCode {
    /// Whether the condition is transient by nature.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServiceUnavailable | Self::Timeout | Self::NetworkError
        )
    }

    /// Whether a different backend could reasonably succeed where this
    /// one failed.
    pub fn allows_fallback(self) -> bool {
        !matches!(
            self,
            Self::ContentFilter | Self::Configuration | Self::Validation | Self::Cancelled
        )
    }

    fn for_status(status: u16) -> Self {
        match status {
            408 | 504 => Self::Timeout,
            429 => Self::RateLimit,
            503 | 529 => Self::ServiceUnavailable,
            401 | 403 => Self::Auth,
            other => Self::Http(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => f.write_str("VALIDATION_ERROR"),
            Self::RateLimit => f.write_str("RATE_LIMIT"),
            Self::ServiceUnavailable => f.write_str("SERVICE_UNAVAILABLE"),
            Self::Timeout => f.write_str("TIMEOUT"),
            Self::NetworkError => f.write_str("NETWORK_ERROR"),
            Self::ContentFilter => f.write_str("CONTENT_FILTER"),
            Self::Configuration => f.write_str("CONFIGURATION_ERROR"),
            Self::Auth => f.write_str("AUTH_ERROR"),
            Self::InvalidResponse => f.write_str("INVALID_RESPONSE"),
            Self::Cancelled => f.write_str("CANCELLED"),
            Self::Http(status) => write!(f, "HTTP_{status}"),
            Self::Unknown => f.write_str("UNKNOWN_ERROR"),
        }
    }
}

/// A provider failure normalized for retry, fallback and client reporting.
///
/// `original_error` keeps the raw native error text for logs. It is never
/// sent to clients.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("[{provider}] {code}: {message}")]
pub struct ModelError {
    pub code: ErrorCode,
    pub message: String,
    pub provider: String,
    pub retryable: bool,
    pub original_error: Option<String>,
}

/// A convenience type alias for adapter and orchestrator operations.
pub type Result<T> = std::result::Result<T, ModelError>;

impl ModelError {
    pub fn new(code: ErrorCode, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: provider.into(),
            retryable: code.is_transient(),
            original_error: None,
        }
    }

    pub fn validation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, provider, message)
    }

    pub fn configuration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, provider, message)
    }

    pub fn with_original(self, original: impl Into<String>) -> Self {
        Self {
            original_error: Some(original.into()),
            ..self
        }
    }

    /// Classify a native provider error.
    pub fn from_provider(provider: &str, err: ProviderError) -> Self {
        let original = err.to_string();
        let (code, message) = match err {
            ProviderError::Status { status, body } => {
                let code = if status == 400 && is_content_policy(&body) {
                    ErrorCode::ContentFilter
                } else {
                    ErrorCode::for_status(status)
                };
                let detail = extract_error_message(&body)
                    .unwrap_or_else(|| format!("provider returned HTTP {status}"));
                (code, detail)
            }
            ProviderError::RateLimited { retry_after_ms } => (
                ErrorCode::RateLimit,
                format!("rate limited (HTTP 429), retry after {retry_after_ms}ms"),
            ),
            ProviderError::AuthFailed(body) => (
                ErrorCode::Auth,
                extract_error_message(&body).unwrap_or_else(|| "authentication failed".into()),
            ),
            ProviderError::ContentFiltered(msg) => (ErrorCode::ContentFilter, msg),
            ProviderError::NotConfigured(msg) => (ErrorCode::Configuration, msg),
            ProviderError::InvalidResponse(msg) => (ErrorCode::InvalidResponse, msg),
            ProviderError::Timeout => (ErrorCode::Timeout, "request timed out".into()),
            ProviderError::Cancelled => (ErrorCode::Cancelled, "stream cancelled".into()),
            ProviderError::Json(e) => (
                ErrorCode::InvalidResponse,
                format!("failed to parse provider response: {e}"),
            ),
            ProviderError::Http(e) => classify_transport(&e),
        };
        Self::new(code, provider, message).with_original(original)
    }
}

fn classify_transport(err: &reqwest::Error) -> (ErrorCode, String) {
    if err.is_timeout() {
        (ErrorCode::Timeout, "request timed out".into())
    } else if err.is_decode() || err.is_body() {
        (
            ErrorCode::InvalidResponse,
            "failed to read provider response".into(),
        )
    } else if let Some(status) = err.status() {
        (
            ErrorCode::for_status(status.as_u16()),
            format!("provider returned HTTP {}", status.as_u16()),
        )
    } else {
        (ErrorCode::NetworkError, "network error contacting provider".into())
    }
}

fn is_content_policy(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("content_policy")
        || lower.contains("content_filter")
        || lower.contains("content policy")
}

/// Pull the human-readable message out of an OpenAI/Anthropic error body
/// (`{"error": {"message": "..."}}`).
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_status() {
        let err = ProviderError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "HTTP 500: boom");
    }

    #[test]
    fn display_rate_limited() {
        let err = ProviderError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited: retry after 5000ms");
    }

    #[test]
    fn code_strings() {
        assert_eq!(ErrorCode::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorCode::Http(502).to_string(), "HTTP_502");
        assert_eq!(ErrorCode::Unknown.to_string(), "UNKNOWN_ERROR");
    }

    #[test]
    fn rate_limit_is_retryable() {
        let err = ModelError::from_provider(
            "openai",
            ProviderError::RateLimited {
                retry_after_ms: 2000,
            },
        );
        assert_eq!(err.code, ErrorCode::RateLimit);
        assert!(err.retryable);
        assert!(err.message.contains("2000ms"));
        assert_eq!(err.provider, "openai");
    }

    #[test]
    fn gateway_statuses_map_to_transient_codes() {
        for (status, code) in [
            (503, ErrorCode::ServiceUnavailable),
            (504, ErrorCode::Timeout),
            (529, ErrorCode::ServiceUnavailable),
        ] {
            let err = ModelError::from_provider(
                "anthropic",
                ProviderError::Status {
                    status,
                    body: String::new(),
                },
            );
            assert_eq!(err.code, code);
            assert!(err.retryable, "{status} should be retryable");
        }
    }

    #[test]
    fn server_error_is_not_retryable() {
        let err = ModelError::from_provider(
            "openai",
            ProviderError::Status {
                status: 500,
                body: r#"{"error":{"message":"internal"}}"#.into(),
            },
        );
        assert_eq!(err.code, ErrorCode::Http(500));
        assert!(!err.retryable);
        assert_eq!(err.message, "internal");
        assert_eq!(err.original_error.as_deref(), Some(r#"HTTP 500: {"error":{"message":"internal"}}"#));
    }

    #[test]
    fn content_policy_400_is_content_filter() {
        let err = ModelError::from_provider(
            "openai",
            ProviderError::Status {
                status: 400,
                body: r#"{"error":{"code":"content_policy_violation","message":"nope"}}"#.into(),
            },
        );
        assert_eq!(err.code, ErrorCode::ContentFilter);
        assert!(!err.retryable);
        assert!(!err.code.allows_fallback());
    }

    #[test]
    fn auth_failure_is_fatal_but_allows_fallback() {
        let err = ModelError::from_provider("openai", ProviderError::AuthFailed("bad".into()));
        assert_eq!(err.code, ErrorCode::Auth);
        assert!(!err.retryable);
        assert!(err.code.allows_fallback());
    }

    #[test]
    fn timeout_is_retryable() {
        let err = ModelError::from_provider("openai", ProviderError::Timeout);
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.retryable);
    }

    #[test]
    fn json_error_is_invalid_response() {
        let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = ModelError::from_provider("openai", serde_err.into());
        assert_eq!(err.code, ErrorCode::InvalidResponse);
        assert!(!err.retryable);
    }

    #[test]
    fn model_error_display() {
        let err = ModelError::configuration("orchestrator", "no adapter for model 'x'");
        assert_eq!(
            err.to_string(),
            "[orchestrator] CONFIGURATION_ERROR: no adapter for model 'x'"
        );
    }

    #[test]
    fn extract_error_message_variants() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"m"}}"#).as_deref(),
            Some("m")
        );
        assert_eq!(
            extract_error_message(r#"{"error":"flat"}"#).as_deref(),
            Some("flat")
        );
        assert!(extract_error_message("plain text").is_none());
    }
}
