//! Provider abstraction for the boardwright completion service.
//!
//! This crate holds everything that sits between the orchestrator and a
//! remote model backend:
//!
//! - [`types`] -- the provider-agnostic request/response model
//! - [`Provider`] -- the adapter capability trait (`complete`,
//!   `complete_stream`, `supports_model`, `health_check`)
//! - [`OpenAiProvider`] and [`AnthropicProvider`] -- the two concrete adapters
//! - [`ModelError`] -- the normalized error shape every adapter produces
//! - [`TokenAccountant`] -- token counting and budget truncation
//! - [`RetryPolicy`] -- exponential backoff over retryable [`ModelError`]s
//! - [`pricing`] -- static per-model price table
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use boardwright_llm::{AdapterConfig, Message, ModelRequest, OpenAiProvider, Provider, TokenAccountant};
//!
//! let provider = OpenAiProvider::new(AdapterConfig::openai(&settings), Arc::new(TokenAccountant::new()));
//! let request = ModelRequest::new("gpt-4", vec![Message::user("What is Rust?")]);
//! let response = provider.complete(&request).await?;
//! println!("{}", response.content);
//! ```

pub mod anthropic;
pub mod config;
pub mod error;
mod http;
pub mod openai;
pub mod pricing;
pub mod provider;
pub mod retry;
pub mod sse;
pub mod tokens;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use config::AdapterConfig;
pub use error::{ErrorCode, ModelError, ProviderError, Result};
pub use openai::OpenAiProvider;
pub use provider::Provider;
pub use retry::{RetryConfig, RetryContext, RetryPolicy};
pub use tokens::{TokenAccountant, Tokenizer};
pub use types::{
    FinishReason, Message, ModelRequest, ModelResponse, PartialUsage, Role, StreamChunk,
    TokenUsage,
};
