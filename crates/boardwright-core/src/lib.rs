//! # boardwright-core
//!
//! Completion orchestration for boardwright.
//!
//! Contains the response cache, the usage-metrics ring buffer and the
//! [`Orchestrator`] that ties sanitization, token budgeting, retry and
//! fallback together.

pub mod cache;
pub mod error;
pub mod metrics;
pub mod orchestrator;

pub use cache::{CacheStats, ResponseCache, cache_key, generate_prompt_fingerprint};
pub use error::{OrchestratorError, Result};
pub use metrics::{MetricsRecorder, UsageMetrics, UsageStats};
pub use orchestrator::{HealthReport, HealthStatus, Orchestrator, ValidatedRequest};
