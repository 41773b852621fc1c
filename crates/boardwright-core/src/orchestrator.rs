//! The completion orchestrator.
//!
//! One [`Orchestrator`] is built at service start and shared by handle. Each
//! call runs the same pipeline:
//!
//! 1. validate and sanitize the input
//! 2. check the prompt against the model's token budget, truncating if needed
//! 3. look up the response cache
//! 4. execute against the adapter that serves the model, under the retry
//!    policy, falling back once to the configured secondary model
//! 5. sanitize the output, store it in the cache and record usage metrics
//!
//! Streaming calls skip the cache and are neither retried nor failed over.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boardwright_llm::provider::DEFAULT_MAX_TOKENS;
use boardwright_llm::{
    AdapterConfig, AnthropicProvider, ModelError, ModelRequest, ModelResponse, OpenAiProvider,
    Provider, RetryConfig, RetryContext, RetryPolicy, StreamChunk, TokenAccountant, TokenUsage,
};
use boardwright_security::{sanitize_markdown_output, sanitize_prompt_input, validate_and_sanitize_request};
use boardwright_types::config::OrchestratorConfig;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStats, ResponseCache, cache_key};
use crate::error::{OrchestratorError, Result};
use crate::metrics::{MetricsRecorder, UsageMetrics, UsageStats};

/// Buffer between an adapter's stream and the caller's channel.
const STREAM_BUFFER: usize = 64;

/// Overall service health derived from the adapter probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of [`Orchestrator::health_check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub adapters: BTreeMap<String, bool>,
}

impl HealthReport {
    fn from_probes(adapters: BTreeMap<String, bool>) -> Self {
        let status = if adapters.is_empty() {
            HealthStatus::Unhealthy
        } else if adapters.values().all(|&ok| ok) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self { status, adapters }
    }
}

/// A request that has passed validation and prompt sanitization.
///
/// Built by [`Orchestrator::validate_raw`] so callers can reject bad input
/// before committing to a response format.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest(ModelRequest);

impl ValidatedRequest {
    pub fn request(&self) -> &ModelRequest {
        &self.0
    }
}

/// Where a blocking call is in its retry/fallback lifecycle.
///
/// The model is rewritten at most once, on the `Primary -> Fallback`
/// transition.
enum CallState {
    Primary,
    Fallback { primary_error: ModelError },
    Succeeded(ModelResponse),
    Failed(ModelError),
}

/// Routes completion requests across the registered adapters.
pub struct Orchestrator {
    adapters: Vec<Arc<dyn Provider>>,
    accountant: Arc<TokenAccountant>,
    cache: ResponseCache<ModelResponse>,
    retry: RetryPolicy,
    metrics: MetricsRecorder,
    primary_model: String,
    fallback_model: String,
    cache_enabled: bool,
    streaming_enabled: bool,
}

impl Orchestrator {
    /// Build the orchestrator and its adapters from configuration.
    ///
    /// Providers without an API key are skipped. Anthropic is registered
    /// ahead of OpenAI, so it wins for any model both declare.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let accountant = Arc::new(TokenAccountant::new());
        let mut adapters: Vec<Arc<dyn Provider>> = Vec::new();

        let anthropic = &config.providers.anthropic;
        if anthropic.is_configured() {
            adapters.push(Arc::new(AnthropicProvider::new(
                AdapterConfig::anthropic(anthropic),
                Arc::clone(&accountant),
            )));
        } else {
            debug!("anthropic provider has no api key, skipping");
        }

        let openai = &config.providers.openai;
        if openai.is_configured() {
            adapters.push(Arc::new(OpenAiProvider::new(
                AdapterConfig::openai(openai),
                Arc::clone(&accountant),
            )));
        } else {
            debug!("openai provider has no api key, skipping");
        }

        if adapters.is_empty() {
            warn!("no providers configured; every completion will fail");
        }

        Self::with_adapters(config, adapters, accountant)
    }

    /// Build with an explicit adapter registry, searched in order.
    pub fn with_adapters(
        config: &OrchestratorConfig,
        adapters: Vec<Arc<dyn Provider>>,
        accountant: Arc<TokenAccountant>,
    ) -> Self {
        info!(
            adapters = ?adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
            primary = %config.primary_model,
            fallback = %config.fallback_model,
            cache = config.cache.enabled,
            streaming = config.streaming.enabled,
            "orchestrator initialized"
        );
        Self {
            adapters,
            accountant,
            cache: ResponseCache::new(
                config.cache.max_entries,
                Duration::from_secs(config.cache.ttl_secs),
            ),
            retry: RetryPolicy::new(RetryConfig::from(&config.retry)),
            metrics: MetricsRecorder::new(config.metrics_window),
            primary_model: config.primary_model.clone(),
            fallback_model: config.fallback_model.clone(),
            cache_enabled: config.cache.enabled,
            streaming_enabled: config.streaming.enabled,
        }
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    pub fn fallback_model(&self) -> &str {
        &self.fallback_model
    }

    pub fn streaming_enabled(&self) -> bool {
        self.streaming_enabled
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Validate and sanitize an untrusted JSON body.
    ///
    /// A body without `model` is sent to the primary model.
    pub fn validate_raw(&self, raw: &Value) -> Result<ValidatedRequest> {
        let input = validate_and_sanitize_request(raw)
            .map_err(|err| OrchestratorError::Validation(err.to_string()))?;
        Ok(ValidatedRequest(input.into_request(&self.primary_model)))
    }

    /// Run a blocking completion for an already-typed request.
    ///
    /// Every message (and the explicit system prompt) passes through
    /// [`sanitize_prompt_input`] first.
    pub async fn complete(&self, request: ModelRequest, session_id: Option<&str>) -> Result<ModelResponse> {
        let request = sanitize_request(request)?;
        self.complete_validated(request, session_id).await
    }

    /// Validate an untrusted JSON body, then complete it.
    pub async fn complete_raw(&self, raw: &Value, session_id: Option<&str>) -> Result<ModelResponse> {
        let request = self.validate_raw(raw)?;
        self.complete_validated(request, session_id).await
    }

    pub async fn complete_validated(
        &self,
        request: ValidatedRequest,
        session_id: Option<&str>,
    ) -> Result<ModelResponse> {
        self.run_completion(request.0, session_id, self.cache_enabled).await
    }

    /// Run a streaming completion, forwarding sanitized chunks to `tx`.
    ///
    /// The returned response carries the full sanitized content. Dropping
    /// the receiver cancels the upstream call.
    pub async fn stream_complete(
        &self,
        request: ModelRequest,
        session_id: Option<&str>,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ModelResponse> {
        let request = sanitize_request(request)?;
        self.stream_validated(request, session_id, tx).await
    }

    /// Streaming counterpart of [`complete_validated`](Self::complete_validated).
    /// Never reads or writes the cache.
    pub async fn stream_validated(
        &self,
        request: ValidatedRequest,
        session_id: Option<&str>,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ModelResponse> {
        self.run_stream(request.0, session_id, tx).await
    }

    /// Probe every adapter concurrently.
    pub async fn health_check(&self) -> HealthReport {
        let probes = join_all(self.adapters.iter().map(|adapter| async move {
            (adapter.name().to_owned(), adapter.health_check().await)
        }))
        .await;
        let report = HealthReport::from_probes(probes.into_iter().collect());
        debug!(status = ?report.status, adapters = ?report.adapters, "health check complete");
        report
    }

    /// Aggregates over the metrics window, with the cache hit rate.
    pub fn usage_stats(&self) -> UsageStats {
        self.metrics.stats(self.cache.stats().hit_rate())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The retained usage records, oldest first.
    pub fn recent_metrics(&self) -> Vec<UsageMetrics> {
        self.metrics.snapshot()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn adapter_for(&self, model: &str) -> Option<&Arc<dyn Provider>> {
        self.adapters.iter().find(|a| a.supports_model(model))
    }

    fn resolve_adapter(&self, model: &str) -> Result<&Arc<dyn Provider>> {
        self.adapter_for(model)
            .ok_or_else(|| OrchestratorError::Configuration(format!("no adapter supports model {model}")))
    }

    /// Truncate the conversation when the prompt exceeds its budget.
    ///
    /// The ceiling is `min(max_tokens or 4096, context window)`; an
    /// oversized prompt is cut to half of it to leave room for the reply.
    fn enforce_token_budget(&self, request: ModelRequest) -> (ModelRequest, usize) {
        let cap = request
            .max_tokens
            .unwrap_or(DEFAULT_MAX_TOKENS) as usize;
        let count = self.accountant.count_message_tokens(&request.messages, &request.model);

        match self.accountant.validate_token_count(count, &request.model, Some(cap)) {
            Ok(()) => (request, count),
            Err(exceeded) => {
                let budget = exceeded.limit / 2;
                let messages = self
                    .accountant
                    .truncate_messages(&request.messages, budget, &request.model);
                let truncated = self.accountant.count_message_tokens(&messages, &request.model);
                warn!(
                    model = %request.model,
                    prompt_tokens = count,
                    limit = exceeded.limit,
                    truncated_tokens = truncated,
                    kept_messages = messages.len(),
                    "prompt over token budget, truncating"
                );
                (request.with_messages(messages), truncated)
            }
        }
    }

    async fn run_completion(
        &self,
        request: ModelRequest,
        session_id: Option<&str>,
        use_cache: bool,
    ) -> Result<ModelResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let (request, prompt_tokens) = self.enforce_token_budget(request);

        let key = use_cache.then(|| cache_key(&request));
        if let Some(key) = &key {
            let cached = self.cache.get(key);
            debug!(request_id = %request_id, key = %key, hit = cached.is_some(), "cache lookup");
            if let Some(mut response) = cached {
                response.cached = true;
                response.latency_ms = started.elapsed().as_millis() as u64;
                self.record(&request_id, session_id, &response, None);
                return Ok(response);
            }
        }

        let adapter = match self.resolve_adapter(&request.model) {
            Ok(adapter) => adapter,
            Err(err) => {
                self.record_failure(&request_id, session_id, &request.model, "unknown", started, &err);
                return Err(err);
            }
        };
        info!(
            request_id = %request_id,
            model = %request.model,
            provider = %adapter.name(),
            prompt_tokens,
            "completion request"
        );

        match self.execute(&request_id, adapter, &request).await {
            Ok(mut response) => {
                response.content = sanitize_markdown_output(&response.content);
                response.latency_ms = started.elapsed().as_millis() as u64;
                info!(
                    request_id = %request_id,
                    provider = %response.provider,
                    model = %response.model,
                    completion_tokens = response.usage.completion_tokens,
                    total_tokens = response.usage.total_tokens,
                    latency_ms = response.latency_ms,
                    finish_reason = ?response.finish_reason,
                    "completion response"
                );
                if let Some(key) = key {
                    self.cache.set(key, response.clone());
                }
                self.record(&request_id, session_id, &response, None);
                Ok(response)
            }
            Err(err) => {
                let err = OrchestratorError::from(err);
                self.record_failure(&request_id, session_id, &request.model, adapter.name(), started, &err);
                Err(err)
            }
        }
    }

    /// Drive the retry/fallback state machine for one logical call.
    async fn execute(
        &self,
        request_id: &str,
        primary: &Arc<dyn Provider>,
        request: &ModelRequest,
    ) -> std::result::Result<ModelResponse, ModelError> {
        let mut state = CallState::Primary;
        loop {
            state = match state {
                CallState::Primary => {
                    let ctx = RetryContext {
                        request_id: request_id.to_owned(),
                        model: request.model.clone(),
                        provider: primary.name().to_owned(),
                    };
                    match self.retry.run(&ctx, || primary.complete(request)).await {
                        Ok(response) => CallState::Succeeded(response),
                        Err(err) if self.should_fall_back(&request.model, &err) => {
                            CallState::Fallback { primary_error: err }
                        }
                        Err(err) => CallState::Failed(err),
                    }
                }
                CallState::Fallback { primary_error } => {
                    match self.adapter_for(&self.fallback_model) {
                        Some(fallback) => {
                            warn!(
                                request_id = %request_id,
                                from = %request.model,
                                to = %self.fallback_model,
                                provider = %fallback.name(),
                                error = %primary_error,
                                "primary model failed, falling back"
                            );
                            let retargeted = request.clone().with_model(self.fallback_model.clone());
                            match fallback.complete(&retargeted).await {
                                Ok(response) => CallState::Succeeded(response),
                                Err(err) => CallState::Failed(err),
                            }
                        }
                        None => {
                            warn!(
                                request_id = %request_id,
                                fallback = %self.fallback_model,
                                "no adapter for fallback model"
                            );
                            CallState::Failed(primary_error)
                        }
                    }
                }
                CallState::Succeeded(response) => return Ok(response),
                CallState::Failed(err) => return Err(err),
            };
        }
    }

    fn should_fall_back(&self, failed_model: &str, err: &ModelError) -> bool {
        err.code.allows_fallback() && self.fallback_model != failed_model
    }

    async fn run_stream(
        &self,
        request: ModelRequest,
        session_id: Option<&str>,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ModelResponse> {
        if !self.streaming_enabled {
            debug!("streaming disabled, serving as one chunk");
            let response = self.run_completion(request, session_id, false).await?;
            let chunk = StreamChunk {
                delta: response.content.clone(),
                usage: Some(response.usage.clone().into()),
                done: true,
            };
            // The caller may already be gone; the response is still returned.
            let _ = tx.send(chunk).await;
            return Ok(response);
        }

        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let (request, prompt_tokens) = self.enforce_token_budget(request);

        let adapter = match self.resolve_adapter(&request.model) {
            Ok(adapter) => adapter,
            Err(err) => {
                self.record_failure(&request_id, session_id, &request.model, "unknown", started, &err);
                return Err(err);
            }
        };
        info!(
            request_id = %request_id,
            model = %request.model,
            provider = %adapter.name(),
            prompt_tokens,
            stream = true,
            "completion request"
        );

        let (inner_tx, mut inner_rx) = mpsc::channel::<StreamChunk>(STREAM_BUFFER);
        let forward = async move {
            while let Some(mut chunk) = inner_rx.recv().await {
                if !chunk.delta.is_empty() {
                    chunk.delta = sanitize_markdown_output(&chunk.delta);
                }
                if tx.send(chunk).await.is_err() {
                    // Returning drops `inner_rx`, which stops the adapter.
                    break;
                }
            }
        };
        let (result, ()) = tokio::join!(adapter.complete_stream(&request, inner_tx), forward);

        match result {
            Ok(mut response) => {
                response.content = sanitize_markdown_output(&response.content);
                response.latency_ms = started.elapsed().as_millis() as u64;
                info!(
                    request_id = %request_id,
                    provider = %response.provider,
                    completion_tokens = response.usage.completion_tokens,
                    total_tokens = response.usage.total_tokens,
                    latency_ms = response.latency_ms,
                    finish_reason = ?response.finish_reason,
                    stream = true,
                    "completion response"
                );
                self.record(&request_id, session_id, &response, None);
                Ok(response)
            }
            Err(err) => {
                let err = OrchestratorError::from(err);
                self.record_failure(&request_id, session_id, &request.model, adapter.name(), started, &err);
                Err(err)
            }
        }
    }

    fn record(&self, request_id: &str, session_id: Option<&str>, response: &ModelResponse, error: Option<String>) {
        self.metrics.record(UsageMetrics {
            session_id: session_id.map(String::from),
            request_id: request_id.to_owned(),
            timestamp: Utc::now(),
            model: response.model.clone(),
            provider: response.provider.clone(),
            usage: response.usage.clone(),
            latency_ms: response.latency_ms,
            cached: response.cached,
            error,
        });
    }

    fn record_failure(
        &self,
        request_id: &str,
        session_id: Option<&str>,
        model: &str,
        provider: &str,
        started: Instant,
        err: &OrchestratorError,
    ) {
        warn!(request_id = %request_id, model = %model, provider = %provider, error = %err, "completion failed");
        self.metrics.record(UsageMetrics {
            session_id: session_id.map(String::from),
            request_id: request_id.to_owned(),
            timestamp: Utc::now(),
            model: model.to_owned(),
            provider: provider.to_owned(),
            usage: TokenUsage::default(),
            latency_ms: started.elapsed().as_millis() as u64,
            cached: false,
            error: Some(err.to_string()),
        });
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapters", &self.adapter_names())
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("cache_enabled", &self.cache_enabled)
            .field("streaming_enabled", &self.streaming_enabled)
            .finish()
    }
}

/// Sanitize every prompt-bearing field of a typed request.
fn sanitize_request(request: ModelRequest) -> Result<ValidatedRequest> {
    if request.messages.is_empty() {
        return Err(OrchestratorError::Validation(
            "messages: at least one message is required".into(),
        ));
    }
    let messages = request
        .messages
        .iter()
        .map(|m| m.with_content(sanitize_prompt_input(&m.content)))
        .collect();
    let system_prompt = request.system_prompt.as_deref().map(sanitize_prompt_input);
    Ok(ValidatedRequest(ModelRequest {
        messages,
        system_prompt,
        ..request
    }))
}
