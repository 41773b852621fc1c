//! Orchestrator error type.

use boardwright_llm::ModelError;
use thiserror::Error;

/// Errors surfaced by the [`Orchestrator`](crate::Orchestrator).
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The request was malformed; never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No adapter can serve the requested model.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A provider call failed after retry and fallback.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl OrchestratorError {
    /// `true` for failures caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// A convenience type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use boardwright_llm::ErrorCode;

    #[test]
    fn client_error_classification() {
        assert!(OrchestratorError::Validation("bad".into()).is_client_error());
        assert!(!OrchestratorError::Configuration("x".into()).is_client_error());
        let model = ModelError::new(ErrorCode::RateLimit, "openai", "slow down");
        assert!(!OrchestratorError::from(model).is_client_error());
    }

    #[test]
    fn model_error_is_transparent() {
        let model = ModelError::new(ErrorCode::Timeout, "openai", "timed out");
        let err = OrchestratorError::from(model);
        assert_eq!(err.to_string(), "[openai] TIMEOUT: timed out");
    }
}
