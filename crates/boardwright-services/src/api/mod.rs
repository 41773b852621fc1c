//! REST + SSE API for the completion orchestrator.
//!
//! Routes:
//!
//! - `POST /completion` -- blocking completion
//! - `POST /completion/stream` -- `text/event-stream` of [`StreamChunk`](boardwright_llm::StreamChunk)s
//! - `GET /health` -- adapter probes and usage statistics

pub mod error;
pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use boardwright_core::Orchestrator;
use boardwright_types::config::ServerConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Result, ServiceError};

/// Shared state accessible by all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Build the API router with all routes.
pub fn build_router(state: ApiState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    handlers::api_routes()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `server.bind` and serve until `shutdown` resolves.
pub async fn serve<F>(state: ApiState, server: &ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = server
        .bind
        .parse()
        .map_err(|_| ServiceError::InvalidBind(server.bind.clone()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "completion api listening");

    axum::serve(listener, build_router(state, &server.cors_origins))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("completion api stopped");
    Ok(())
}
