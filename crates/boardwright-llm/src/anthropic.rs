//! Anthropic Messages API adapter.
//!
//! [`AnthropicProvider`] speaks `POST {base_url}/messages`. The system
//! prompt goes in the dedicated top-level `system` field rather than the
//! message list. Streaming decodes the typed event stream:
//!
//! | event                 | used for                         |
//! |-----------------------|----------------------------------|
//! | `message_start`       | prompt (input) token count       |
//! | `content_block_delta` | text deltas                      |
//! | `message_delta`       | stop reason, output token count  |
//! | `message_stop`        | end of stream                    |
//! | `error`               | mid-stream failure               |

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
use crate::provider::{
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, Provider, split_system, validate_request,
};
use crate::sse::{LineBuffer, SseLine, parse_sse_line};
use crate::tokens::{TokenAccountant, estimate_tokens};
use crate::types::{FinishReason, ModelRequest, ModelResponse, StreamChunk, TokenUsage};

/// API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl StreamErrorBody {
    fn into_provider_error(self) -> ProviderError {
        match self.kind.as_str() {
            "rate_limit_error" => ProviderError::RateLimited {
                retry_after_ms: 1000,
            },
            "overloaded_error" => ProviderError::Status {
                status: 529,
                body: self.message,
            },
            _ => ProviderError::Status {
                status: 500,
                body: format!("{}: {}", self.kind, self.message),
            },
        }
    }
}

fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("end_turn" | "stop_sequence" | "tool_use") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        Some(_) => FinishReason::Error,
    }
}

#[derive(Default)]
struct StreamState {
    content: String,
    stop_reason: Option<String>,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    done: bool,
}

// ── Provider ─────────────────────────────────────────────────────────────

/// Adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    config: AdapterConfig,
    http: reqwest::Client,
    accountant: Arc<TokenAccountant>,
}

impl AnthropicProvider {
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

    fn body<'a>(&self, request: &'a ModelRequest, stream: bool) -> Result<MessagesBody<'a>> {
        let (system, conversation) = split_system(request);
        if conversation.is_empty() {
            return Err(ModelError::validation(
                &self.config.name,
                "request must contain at least one non-system message",
            ));
        }
        Ok(MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            system,
            messages: conversation
                .into_iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
        })
    }

    async fn send(&self, body: &MessagesBody<'_>, stream: bool) -> Result<reqwest::Response> {
        if self.config.api_key.is_empty() {
            return Err(self.fail(ProviderError::NotConfigured(format!(
                "no API key for {}",
                self.config.name
            ))));
        }

        let mut req = self
            .http
            .post(self.config.endpoint("messages"))
            .header("x-api-key", self.config.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
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

    fn usage_for(&self, request: &ModelRequest, input: Option<u32>, output: u32) -> TokenUsage {
        let prompt = input.filter(|&n| n > 0).unwrap_or_else(|| {
            let counted = self
                .accountant
                .count_message_tokens(&request.messages, &request.model);
            u32::try_from(counted).unwrap_or(u32::MAX)
        });
        let usage = TokenUsage::new(prompt, output);
        let cost = estimate_cost(usage.prompt_tokens, usage.completion_tokens, &request.model);
        usage.with_cost(cost)
    }

    async fn handle_line(
        &self,
        line: &str,
        tx: &mpsc::Sender<StreamChunk>,
        state: &mut StreamState,
    ) -> Result<()> {
        // The event name is repeated in the payload's `type` field, so only
        // data lines matter.
        let payload = match parse_sse_line(line) {
            SseLine::Data(payload) => payload,
            SseLine::Done => {
                state.done = true;
                return Ok(());
            }
            SseLine::Event(_) | SseLine::Skip => return Ok(()),
        };

        let event: StreamEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(provider = %self.config.name, error = %e, "SSE parse error, skipping line");
                return Ok(());
            }
        };

        match event {
            StreamEvent::MessageStart { message } => {
                state.input_tokens = message.usage.map(|u| u.input_tokens);
            }
            StreamEvent::ContentBlockDelta { delta } => {
                if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                    trace!(provider = %self.config.name, len = text.len(), "streaming delta");
                    state.content.push_str(&text);
                    if tx.send(StreamChunk::delta(text)).await.is_err() {
                        debug!(provider = %self.config.name, "stream receiver dropped, stopping");
                        return Err(self.fail(ProviderError::Cancelled));
                    }
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    state.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    state.output_tokens = Some(usage.output_tokens);
                }
            }
            StreamEvent::MessageStop => state.done = true,
            StreamEvent::Error { error } => {
                warn!(provider = %self.config.name, kind = %error.kind, "error event in stream");
                return Err(self.fail(error.into_provider_error()));
            }
            StreamEvent::Other => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supported_models(&self) -> &[String] {
        &self.config.models
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        validate_request(self, request)?;
        let body = self.body(request, false)?;
        let started = Instant::now();

        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = body.messages.len(),
            "sending messages request"
        );

        let response = self.send(&body, false).await?;
        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            self.fail(ProviderError::InvalidResponse(format!(
                "failed to parse response: {e}"
            )))
        })?;

        let texts: Vec<&str> = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        let finish_reason = map_stop_reason(parsed.stop_reason.as_deref());
        // Refusals usually arrive with an empty content array.
        if texts.is_empty() && finish_reason != FinishReason::ContentFilter {
            return Err(self.fail(ProviderError::InvalidResponse(
                "response contained no text content".into(),
            )));
        }
        let content = texts.concat();

        let reported = parsed.usage.unwrap_or_default();
        let output = if reported.output_tokens > 0 {
            reported.output_tokens
        } else {
            u32::try_from(self.accountant.count_tokens(&content, &request.model))
                .unwrap_or(u32::MAX)
        };
        let usage = self.usage_for(request, Some(reported.input_tokens), output);

        debug!(
            provider = %self.config.name,
            model = %request.model,
            completion_tokens = usage.completion_tokens,
            "messages response received"
        );

        Ok(ModelResponse {
            content,
            model: request.model.clone(),
            provider: self.config.name.clone(),
            usage,
            finish_reason,
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
        let body = self.body(request, true)?;
        let started = Instant::now();

        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = body.messages.len(),
            "sending streaming messages request"
        );

        let response = self.send(&body, true).await?;
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

        let output = state
            .output_tokens
            .unwrap_or_else(|| u32::try_from(estimate_tokens(&state.content)).unwrap_or(u32::MAX));
        let usage = self.usage_for(request, state.input_tokens, output);
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
            finish_reason: map_stop_reason(state.stop_reason.as_deref()),
            cached: false,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("name", &self.config.name)
            .field("base_url", &self.config.base_url)
            .field("api_key", &self.config.api_key)
            .finish()
    }
}
