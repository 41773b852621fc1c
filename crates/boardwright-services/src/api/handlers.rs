//! HTTP request handlers for the completion API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use boardwright_core::{HealthStatus, OrchestratorError};
use boardwright_llm::sse::DONE_SENTINEL;
use boardwright_llm::{ModelResponse, StreamChunk, TokenUsage};
use boardwright_security::sanitize_error_message;
use chrono::Utc;
use futures_util::Stream;
use futures_util::stream;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ApiState;
use super::error::ApiError;

/// Optional header tying usage metrics to a caller session.
pub const SESSION_HEADER: &str = "x-session-id";

const EVENT_BUFFER: usize = 64;

/// Build all API routes.
pub fn api_routes() -> Router<ApiState> {
    Router::new()
        .route("/completion", post(complete))
        .route("/completion/stream", post(complete_stream))
        .route("/health", get(health))
}

/// The `data` field of a successful completion.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionData {
    content: String,
    model: String,
    provider: String,
    usage: TokenUsage,
    cached: bool,
    latency_ms: u64,
}

impl From<ModelResponse> for CompletionData {
    fn from(response: ModelResponse) -> Self {
        Self {
            content: response.content,
            model: response.model,
            provider: response.provider,
            usage: response.usage,
            cached: response.cached,
            latency_ms: response.latency_ms,
        }
    }
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

async fn complete(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let session = session_id(&headers);
    let response = state
        .orchestrator
        .complete_raw(&body, session.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "data": CompletionData::from(response),
    })))
}

/// Validation happens before the event stream opens, so bad input is a
/// plain `400`. After that every outcome is an event: chunks, then either
/// the `[DONE]` sentinel or one `{"error"}` event.
async fn complete_stream(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(body) = payload?;
    let request = state.orchestrator.validate_raw(&body)?;
    let session = session_id(&headers);

    let (event_tx, event_rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        let (chunk_tx, chunk_rx) = mpsc::channel::<StreamChunk>(EVENT_BUFFER);
        let forward = forward_chunks(chunk_rx, event_tx.clone());
        let (result, ()) = tokio::join!(
            orchestrator.stream_validated(request, session.as_deref(), chunk_tx),
            forward
        );
        let last = match result {
            Ok(_) => Event::default().data(DONE_SENTINEL),
            Err(err) => error_event(&err),
        };
        if event_tx.send(last).await.is_err() {
            debug!("stream client disconnected before completion");
        }
    });

    let events = stream::unfold(event_rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Encode chunks as SSE events until either side hangs up.
async fn forward_chunks(mut chunks: mpsc::Receiver<StreamChunk>, events: mpsc::Sender<Event>) {
    while let Some(chunk) = chunks.recv().await {
        let event = match Event::default().json_data(&chunk) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "failed to encode stream chunk");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            // Dropping `chunks` cancels the upstream call.
            break;
        }
    }
}

fn error_event(err: &OrchestratorError) -> Event {
    let message = sanitize_error_message(&err.to_string());
    Event::default().data(json!({ "error": message }).to_string())
}

async fn health(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    let report = state.orchestrator.health_check().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    let body = json!({
        "status": report.status,
        "timestamp": Utc::now().to_rfc3339(),
        "adapters": report.adapters,
        "stats": state.orchestrator.usage_stats(),
    });
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn session_header_is_trimmed() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&headers), None);

        headers.insert(SESSION_HEADER, HeaderValue::from_static("  abc  "));
        assert_eq!(session_id(&headers).as_deref(), Some("abc"));

        headers.insert(SESSION_HEADER, HeaderValue::from_static("   "));
        assert_eq!(session_id(&headers), None);
    }

    #[test]
    fn completion_data_is_camel_case() {
        let data = CompletionData {
            content: "hi".into(),
            model: "gpt-4".into(),
            provider: "openai".into(),
            usage: TokenUsage::new(1, 2),
            cached: false,
            latency_ms: 7,
        };
        let json = serde_json::to_value(data).unwrap();
        assert_eq!(json["latencyMs"], 7);
        assert_eq!(json["usage"]["totalTokens"], 3);
    }
}
