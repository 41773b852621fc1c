//! The [`Provider`] trait every backend adapter implements.
//!
//! The orchestrator keeps a registry of `Arc<dyn Provider>` and picks the
//! first one whose [`Provider::supports_model`] accepts the requested model,
//! so adding a backend never touches orchestration code.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::types::{Message, ModelRequest, ModelResponse, Role, StreamChunk};

/// Max tokens used when a request does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Temperature used when a request does not set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

const SYSTEM_SEPARATOR: &str = "\n\n";

/// A backend that can serve completions for a set of models.
///
/// # Example
///
/// ```rust,ignore
/// use boardwright_llm::{Message, ModelRequest, Provider};
///
/// async fn ask(provider: &dyn Provider) -> boardwright_llm::Result<String> {
///     let request = ModelRequest::new("gpt-4", vec![Message::user("What is 2+2?")]);
///     Ok(provider.complete(&request).await?.content)
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id reported in responses (e.g. "openai", "anthropic").
    fn name(&self) -> &str;

    /// Models this adapter accepts.
    fn supported_models(&self) -> &[String];

    fn supports_model(&self, model: &str) -> bool {
        self.supported_models().iter().any(|m| m == model)
    }

    /// Run a blocking completion.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Run a streaming completion.
    ///
    /// Sends one [`StreamChunk`] per content delta, then exactly one chunk
    /// with `done == true` and an empty delta. If `tx`'s receiver is
    /// dropped the stream stops and a `Cancelled` error is returned.
    async fn complete_stream(
        &self,
        request: &ModelRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ModelResponse>;

    /// Issue a minimal 5-token completion against the first supported model.
    async fn health_check(&self) -> bool {
        let Some(model) = self.supported_models().first() else {
            return false;
        };
        let probe = ModelRequest::new(model.clone(), vec![Message::user("test")]).with_max_tokens(5);
        match self.complete(&probe).await {
            Ok(_) => true,
            Err(err) => {
                debug!(provider = %self.name(), error = %err, "health check failed");
                false
            }
        }
    }
}

/// Checks every adapter performs before going to the network.
pub fn validate_request(provider: &dyn Provider, request: &ModelRequest) -> Result<()> {
    if !provider.supports_model(&request.model) {
        return Err(ModelError::configuration(
            provider.name(),
            format!("model '{}' is not supported by {}", request.model, provider.name()),
        ));
    }
    if request.messages.is_empty() {
        return Err(ModelError::validation(
            provider.name(),
            "request must contain at least one message",
        ));
    }
    Ok(())
}

/// Separate the system prompt from the conversation.
///
/// An explicit `system_prompt` comes first, followed by every `system`
/// message in order, joined by blank lines. All `system` messages are
/// removed from the returned list.
pub fn split_system(request: &ModelRequest) -> (Option<String>, Vec<&Message>) {
    let parts: Vec<&str> = request
        .system_prompt
        .as_deref()
        .into_iter()
        .chain(
            request
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.as_str()),
        )
        .filter(|s| !s.trim().is_empty())
        .collect();
    let system = (!parts.is_empty()).then(|| parts.join(SYSTEM_SEPARATOR));
    let rest = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    (system, rest)
}
