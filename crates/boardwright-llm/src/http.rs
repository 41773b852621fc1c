//! HTTP status handling shared by the adapters.

use tracing::warn;

use crate::error::ProviderError;

/// Default wait reported for a 429 without any retry hint.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Pass a successful response through, or turn a failed one into the
/// matching [`ProviderError`].
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        // Retry-After header first, then body JSON, then default
        let header_ms = parse_retry_after_header(&response);
        let body = response.text().await.unwrap_or_default();
        let retry_after_ms = header_ms
            .or_else(|| parse_retry_after_ms(&body))
            .unwrap_or(DEFAULT_RETRY_AFTER_MS);
        warn!(provider, retry_after_ms, "rate limited");
        return Err(ProviderError::RateLimited { retry_after_ms });
    }

    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(ProviderError::AuthFailed(body)),
        status => Err(ProviderError::Status { status, body }),
    }
}

/// Numeric `Retry-After` (seconds, integer or float) in milliseconds.
/// HTTP-date values are ignored.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    let value = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())?;
    value
        .trim()
        .parse::<f64>()
        .ok()
        .map(|secs| (secs * 1000.0).max(0.0) as u64)
}

/// `retry_after_ms` or `retry_after` (seconds) from a JSON error body.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("retry_after_ms").and_then(|v| v.as_u64()).or_else(|| {
        value
            .get("retry_after")
            .and_then(|v| v.as_f64())
            .map(|secs| (secs * 1000.0).max(0.0) as u64)
    })
}

/// Map a transport failure, keeping timeouts distinct.
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(err)
    }
}
