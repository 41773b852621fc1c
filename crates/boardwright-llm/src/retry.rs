//! Exponential backoff retry logic for provider calls.
//!
//! [`RetryPolicy`] runs an async operation, classifies each failure with
//! [`is_retryable`], and sleeps `min(initial * multiplier^attempt, max)`
//! between attempts. Classification happens before the budget check, so a
//! non-retryable error is returned immediately without any delay.
//!
//! Jitter is not applied inside the loop. [`add_jitter`] is available for
//! callers that want it.

use std::future::Future;
use std::time::Duration;

use boardwright_types::config::{RetrySettings, default_retryable_codes};
use rand::Rng;
use tracing::{debug, warn};

use crate::error::ModelError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3).
    pub max_retries: u32,
    /// Delay before the first retry (default: 1 second).
    pub initial_delay: Duration,
    /// Upper bound on any single delay (default: 30 seconds).
    pub max_delay: Duration,
    /// Growth factor per attempt (default: 2.0). Values below 1.0 are
    /// treated as 1.0.
    pub backoff_multiplier: f64,
    /// Substrings that mark an error retryable when found in its code or
    /// message.
    pub retryable_codes: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retryable_codes: default_retryable_codes(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            retryable_codes: settings.retryable_codes.clone(),
        }
    }
}

/// Whether `err` should be retried under `config`.
pub fn is_retryable(err: &ModelError, config: &RetryConfig) -> bool {
    let code = err.code.to_string();
    config
        .retryable_codes
        .iter()
        .any(|token| code.contains(token.as_str()) || err.message.contains(token.as_str()))
}

/// Delay before retry number `attempt` (0-indexed).
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    if config.initial_delay.is_zero() {
        return Duration::ZERO;
    }
    let multiplier = config.backoff_multiplier.max(1.0);
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw_ms = config.initial_delay.as_millis() as f64 * multiplier.powi(exponent);
    let max_ms = config.max_delay.as_millis() as f64;
    Duration::from_millis(raw_ms.min(max_ms) as u64)
}

/// The full sequence of delays a policy would use, one per retry.
pub fn backoff_schedule(config: &RetryConfig) -> Vec<Duration> {
    (0..config.max_retries)
        .map(|attempt| compute_delay(config, attempt))
        .collect()
}

/// Randomly perturb `delay` by up to `±factor * delay`, floored at zero.
pub fn add_jitter(delay: Duration, factor: f64) -> Duration {
    let base = delay.as_millis() as f64;
    let spread = base * factor.abs();
    if spread <= 0.0 {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis((base + offset).max(0.0) as u64)
}

/// Identifies the call being retried, for logging.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    pub request_id: String,
    pub model: String,
    pub provider: String,
}

/// Runs operations under exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Call `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_retries + 1` attempts have been made.
    pub async fn run<T, F, Fut>(&self, ctx: &RetryContext, mut operation: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    debug!(
                        request_id = %ctx.request_id,
                        provider = %ctx.provider,
                        model = %ctx.model,
                        attempt,
                        "attempt succeeded"
                    );
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = is_retryable(&err, &self.config);
                    if !retryable || attempt >= self.config.max_retries {
                        warn!(
                            request_id = %ctx.request_id,
                            provider = %ctx.provider,
                            model = %ctx.model,
                            attempt,
                            retryable,
                            error = %err,
                            "attempt failed, giving up"
                        );
                        return Err(err);
                    }

                    let delay = compute_delay(&self.config, attempt);
                    warn!(
                        request_id = %ctx.request_id,
                        provider = %ctx.provider,
                        model = %ctx.model,
                        attempt,
                        retryable,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
