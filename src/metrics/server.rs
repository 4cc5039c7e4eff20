//! Prometheus exporter for a running acquisition.
//!
//! The registry is shared with the acquisition loop, which pushes pipeline
//! snapshots into it while requests are being served.

use crate::metrics::MetricsRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Errors raised by the exporter.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("exporter stopped: {0}")]
    Serve(#[source] std::io::Error),
}

/// `/metrics` and `/health` endpoints over a bound listener.
pub struct MetricsServer {
    listener: TcpListener,
    registry: Arc<MetricsRegistry>,
}

impl MetricsServer {
    /// Listens on all interfaces. Port 0 picks a free port.
    pub async fn bind(port: u16, registry: Arc<MetricsRegistry>) -> Result<Self, ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Serve)
    }

    /// Serves requests until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "metrics exporter listening");
        axum::serve(self.listener, router(self.registry))
            .await
            .map_err(ServerError::Serve)
    }
}

fn router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(export))
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .with_state(registry)
}

async fn export(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    match registry.encode() {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
