//! HTTP server for Prometheus metrics endpoint.

use crate::metrics::MetricsRegistry;
use crate::session::{CameraSessionManager, SessionState};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during metrics server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    /// The server stopped with an error.
    #[error("server error: {0}")]
    Server(String),
}

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    /// Creates a config with a custom port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], port).into(),
        }
    }
}

/// Shared state for the metrics server.
struct MetricsState {
    registry: MetricsRegistry,
    session: CameraSessionManager,
}

/// HTTP server exposing session metrics.
///
/// Metrics are refreshed from the session on every scrape.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Arc<MetricsState>,
}

impl MetricsServer {
    /// Serves `registry`, refreshed from `session` on every scrape.
    pub fn new(
        config: MetricsServerConfig,
        registry: MetricsRegistry,
        session: CameraSessionManager,
    ) -> Self {
        Self {
            config,
            state: Arc::new(MetricsState { registry, session }),
        }
    }

    /// Starts the HTTP server.
    ///
    /// This method runs the server until it is shut down.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(self.state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!(
            addr = %self.config.bind_addr,
            "Metrics server listening"
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))?;

        Ok(())
    }
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    state.registry.update(&state.session.stats());

    match state.registry.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// Handler for the /health endpoint. Unhealthy while the session is in `Error`.
async fn health_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    match state.session.state() {
        SessionState::Error => (StatusCode::SERVICE_UNAVAILABLE, "camera error"),
        _ => (StatusCode::OK, "OK"),
    }
}
