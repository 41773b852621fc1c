//! # boardwright-types
//!
//! Shared definitions for the boardwright completion service.
//!
//! - **[`config`]** -- Orchestrator configuration schema (providers, cache,
//!   retry, streaming, HTTP server) and environment overrides
//! - **[`secret`]** -- [`SecretString`] wrapper for provider API keys

pub mod config;
pub mod secret;

pub use config::OrchestratorConfig;
pub use secret::SecretString;
