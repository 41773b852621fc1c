//! Client-facing error responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boardwright_core::OrchestratorError;
use boardwright_security::sanitize_error_message;
use serde_json::json;
use tracing::debug;

/// An error on its way to the client.
///
/// Bad input becomes `400 {"error"}`; everything else becomes
/// `500 {"success": false, "error"}` with credentials redacted.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg) | Self::Internal(msg) => msg,
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        if err.is_client_error() {
            Self::BadRequest(err.to_string())
        } else {
            Self::Internal(sanitize_error_message(&err.to_string()))
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection, "rejected request body");
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequest(error) => json!({ "error": error }),
            Self::Internal(error) => json!({ "success": false, "error": error }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardwright_llm::{ErrorCode, ModelError};

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ApiError::from(OrchestratorError::Validation("messages: required".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("messages"));
    }

    #[test]
    fn model_errors_are_redacted() {
        let model = ModelError::new(ErrorCode::Auth, "openai", "bad key api_key=sk-live-123");
        let err = ApiError::from(OrchestratorError::from(model));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("sk-live-123"));
        assert!(err.message().contains("API_KEY=***"));
    }

    #[test]
    fn configuration_is_a_server_error() {
        let err = ApiError::from(OrchestratorError::Configuration("no adapter".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
