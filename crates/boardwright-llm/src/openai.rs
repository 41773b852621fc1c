//! OpenAI Chat Completions adapter.
//!
//! [`OpenAiProvider`] speaks `POST {base_url}/chat/completions` with bearer
//! auth. Streaming sets `stream_options.include_usage` so the final SSE
//! event carries exact token counts; when a compatible endpoint omits it,
//! completion tokens are estimated from the streamed text.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::AdapterConfig;
use crate::error::{ModelError, ProviderError, Result};
use crate::http::{check_status, transport_error};
use crate::pricing::estimate_cost;
use crate::provider::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, Provider, validate_request};
use crate::sse::{LineBuffer, SseLine, parse_sse_line};
use crate::tokens::{TokenAccountant, estimate_tokens};
use crate::types::{
    FinishReason, Message, ModelRequest, ModelResponse, Role, StreamChunk, TokenUsage,
};

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Clone, Copy)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        Some(_) => FinishReason::Error,
    }
}

/// Progress of one streaming call.
#[derive(Default)]
struct StreamState {
    content: String,
    finish_reason: Option<String>,
    usage: Option<WireUsage>,
    done: bool,
}

// ── Provider ─────────────────────────────────────────────────────────────

/// Adapter for the OpenAI Chat Completions API (and compatible endpoints).
pub struct OpenAiProvider {
    config: AdapterConfig,
    http: reqwest::Client,
    accountant: Arc<TokenAccountant>,
}

impl OpenAiProvider {
    pub fn new(config: AdapterConfig, accountant: Arc<TokenAccountant>) -> Self {
        let http = config.http_client();
        Self {
            config,
            http,
            accountant,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    fn fail(&self, err: ProviderError) -> ModelError {
        ModelError::from_provider(&self.config.name, err)
    }

    /// Conversation as sent: an explicit system prompt becomes a leading
    /// system message ahead of any already in the conversation.
    fn wire_messages<'a>(request: &'a ModelRequest) -> Vec<WireMessage<'a>> {
        let leading = request
            .system_prompt
            .as_deref()
            .map(|content| WireMessage {
                role: Role::System.as_str(),
                content,
            });
        leading
            .into_iter()
            .chain(request.messages.iter().map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            }))
            .collect()
    }

    /// Messages used for local prompt-token accounting.
    fn counted_messages(request: &ModelRequest) -> Vec<Message> {
        Self::wire_messages(request)
            .into_iter()
            .map(|m| Message::new(Role::parse(m.role).unwrap_or(Role::User), m.content))
            .collect()
    }

    fn body<'a>(&self, request: &'a ModelRequest, stream: bool) -> ChatBody<'a> {
        ChatBody {
            model: &request.model,
            messages: Self::wire_messages(request),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, body: &ChatBody<'_>, stream: bool) -> Result<reqwest::Response> {
        if self.config.api_key.is_empty() {
            return Err(self.fail(ProviderError::NotConfigured(format!(
                "no API key for {}",
                self.config.name
            ))));
        }

        let mut req = self
            .http
            .post(self.config.endpoint("chat/completions"))
            .bearer_auth(self.config.api_key.expose())
            .header("Content-Type", "application/json");
        if stream {
            req = req.header("Accept", "text/event-stream");
        }

        let response = req
            .json(body)
            .send()
            .await
            .map_err(|e| self.fail(transport_error(e)))?;
        check_status(&self.config.name, response)
            .await
            .map_err(|e| self.fail(e))
    }

    fn usage_for(&self, request: &ModelRequest, reported: Option<WireUsage>, completion_estimate: u32) -> TokenUsage {
        let prompt = reported.map(|u| u.prompt_tokens).filter(|&n| n > 0).unwrap_or_else(|| {
            let counted = self
                .accountant
                .count_message_tokens(&Self::counted_messages(request), &request.model);
            u32::try_from(counted).unwrap_or(u32::MAX)
        });
        let completion = reported
            .map(|u| u.completion_tokens)
            .filter(|&n| n > 0)
            .unwrap_or(completion_estimate);
        let usage = TokenUsage::new(prompt, completion);
        let cost = estimate_cost(usage.prompt_tokens, usage.completion_tokens, &request.model);
        usage.with_cost(cost)
    }

    /// Handle one SSE line. Deltas are forwarded to `tx` as they arrive.
    async fn handle_line(
        &self,
        line: &str,
        tx: &mpsc::Sender<StreamChunk>,
        state: &mut StreamState,
    ) -> Result<()> {
        let payload = match parse_sse_line(line) {
            SseLine::Data(payload) => payload,
            SseLine::Done => {
                state.done = true;
                return Ok(());
            }
            SseLine::Event(_) | SseLine::Skip => return Ok(()),
        };

        let chunk: ChatChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(provider = %self.config.name, error = %e, "SSE parse error, skipping line");
                return Ok(());
            }
        };

        if let Some(usage) = chunk.usage {
            state.usage = Some(usage);
        }
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                state.finish_reason = Some(reason);
            }
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                trace!(provider = %self.config.name, len = text.len(), "streaming delta");
                state.content.push_str(&text);
                if tx.send(StreamChunk::delta(text)).await.is_err() {
                    debug!(provider = %self.config.name, "stream receiver dropped, stopping");
                    return Err(self.fail(ProviderError::Cancelled));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supported_models(&self) -> &[String] {
        &self.config.models
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        validate_request(self, request)?;
        let started = Instant::now();

        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let response = self.send(&self.body(request, false), false).await?;
        let completion: ChatCompletion = response.json().await.map_err(|e| {
            self.fail(ProviderError::InvalidResponse(format!(
                "failed to parse response: {e}"
            )))
        })?;

        let Some(choice) = completion.choices.into_iter().next() else {
            return Err(self.fail(ProviderError::InvalidResponse(
                "response contained no choices".into(),
            )));
        };
        let content = choice.message.content.unwrap_or_default();
        let estimate = u32::try_from(self.accountant.count_tokens(&content, &request.model))
            .unwrap_or(u32::MAX);
        let usage = self.usage_for(request, completion.usage, estimate);

        debug!(
            provider = %self.config.name,
            model = %request.model,
            completion_tokens = usage.completion_tokens,
            "chat completion response received"
        );

        Ok(ModelResponse {
            content,
            model: request.model.clone(),
            provider: self.config.name.clone(),
            usage,
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
            cached: false,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn complete_stream(
        &self,
        request: &ModelRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ModelResponse> {
        validate_request(self, request)?;
        let started = Instant::now();

        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "sending streaming chat completion request"
        );

        let response = self.send(&self.body(request, true), true).await?;
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut state = StreamState::default();

        while !state.done
            && let Some(bytes) = byte_stream.next().await
        {
            let bytes = bytes.map_err(|e| self.fail(transport_error(e)))?;
            for line in lines.push(&bytes) {
                self.handle_line(&line, &tx, &mut state).await?;
                if state.done {
                    break;
                }
            }
        }
        if !state.done
            && let Some(rest) = lines.finish()
        {
            self.handle_line(&rest, &tx, &mut state).await?;
        }

        let estimate = u32::try_from(estimate_tokens(&state.content)).unwrap_or(u32::MAX);
        let usage = self.usage_for(request, state.usage, estimate);
        if tx
            .send(StreamChunk::finished(usage.completion_tokens))
            .await
            .is_err()
        {
            return Err(self.fail(ProviderError::Cancelled));
        }

        debug!(
            provider = %self.config.name,
            completion_tokens = usage.completion_tokens,
            "streaming complete"
        );

        Ok(ModelResponse {
            content: state.content,
            model: request.model.clone(),
            provider: self.config.name.clone(),
            usage,
            finish_reason: map_finish_reason(state.finish_reason.as_deref()),
            cached: false,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.config.name)
            .field("base_url", &self.config.base_url)
            .field("api_key", &self.config.api_key)
            .finish()
    }
}
