//! Usage metrics ring buffer.
//!
//! Keeps the most recent `window` records in memory for aggregate
//! statistics. Nothing is persisted; the buffer starts empty on restart.

use std::collections::VecDeque;

use boardwright_llm::types::TokenUsage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// One completed (or failed) call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UsageMetrics {
    fn counts_toward_totals(&self) -> bool {
        !self.cached && self.error.is_none()
    }
}

/// Aggregates over the current window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_requests: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_latency_ms: f64,
    pub cache_hit_rate: f64,
}

/// Fixed-size, append-only log of [`UsageMetrics`].
pub struct MetricsRecorder {
    window: usize,
    records: Mutex<VecDeque<UsageMetrics>>,
}

impl MetricsRecorder {
    /// A `window` of zero is treated as one.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            records: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    pub fn record(&self, metrics: UsageMetrics) {
        let mut records = self.records.lock();
        if records.len() == self.window {
            records.pop_front();
        }
        records.push_back(metrics);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<UsageMetrics> {
        self.records.lock().iter().cloned().collect()
    }

    /// Aggregate the window. Token and cost totals include only
    /// successful calls that reached a provider.
    pub fn stats(&self, cache_hit_rate: f64) -> UsageStats {
        let records = self.records.lock();
        if records.is_empty() {
            return UsageStats {
                cache_hit_rate,
                ..UsageStats::default()
            };
        }

        let billable = records.iter().filter(|m| m.counts_toward_totals());
        let (total_tokens, total_cost) = billable.fold((0u64, 0.0f64), |(tokens, cost), m| {
            (
                tokens + u64::from(m.usage.total_tokens),
                cost + m.usage.estimated_cost.unwrap_or(0.0),
            )
        });
        let latency_sum: u64 = records.iter().map(|m| m.latency_ms).sum();

        UsageStats {
            total_requests: records.len(),
            total_tokens,
            total_cost,
            average_latency_ms: latency_sum as f64 / records.len() as f64,
            cache_hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(id: &str, tokens: u32, cached: bool, error: Option<&str>) -> UsageMetrics {
        UsageMetrics {
            session_id: None,
            request_id: id.into(),
            timestamp: Utc::now(),
            model: "gpt-4".into(),
            provider: "openai".into(),
            usage: TokenUsage::new(tokens, 0).with_cost(f64::from(tokens) / 1000.0),
            latency_ms: 100,
            cached,
            error: error.map(String::from),
        }
    }

    #[test]
    fn window_drops_oldest() {
        let recorder = MetricsRecorder::new(3);
        for i in 0..5 {
            recorder.record(metric(&format!("r{i}"), 1, false, None));
        }
        let ids: Vec<String> = recorder.snapshot().into_iter().map(|m| m.request_id).collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn empty_stats() {
        let recorder = MetricsRecorder::new(10);
        let stats = recorder.stats(0.5);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.average_latency_ms, 0.0);
        assert_eq!(stats.cache_hit_rate, 0.5);
    }

    #[test]
    fn totals_skip_cached_and_failed() {
        let recorder = MetricsRecorder::new(10);
        recorder.record(metric("ok", 100, false, None));
        recorder.record(metric("hit", 100, true, None));
        recorder.record(metric("err", 100, false, Some("boom")));

        let stats = recorder.stats(0.0);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.total_tokens, 100);
        assert!((stats.total_cost - 0.1).abs() < 1e-12);
        assert_eq!(stats.average_latency_ms, 100.0);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(metric("r", 1, false, None)).unwrap();
        assert_eq!(json["requestId"], "r");
        assert_eq!(json["latencyMs"], 100);
        assert!(json.get("error").is_none());
        assert!(json.get("sessionId").is_none());
    }
}
