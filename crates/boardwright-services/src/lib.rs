//! HTTP services for boardwright.
//!
//! - [`api`] -- the axum router exposing completion, streaming completion
//!   and health endpoints over a shared [`Orchestrator`](boardwright_core::Orchestrator)

pub mod api;
pub mod error;

pub use error::{Result, ServiceError};
