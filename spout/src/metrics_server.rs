//! HTTP server for the Prometheus metrics endpoint
//!
//! Serves `/metrics` (Prometheus text format) and `/health` on a separate
//! address. `/health` answers 503 once the process has started shutting
//! down so load balancers stop routing to it.
//!
//! # Example
//!
//! ```ignore
//! use retry_spout::metrics_server::{Health, MetricsServer};
//!
//! let health = Health::new();
//! let metrics_handle = MetricsServer::start(config.metrics_addr, health.clone());
//!
//! // Later
//! health.set_stopping();
//! metrics_handle.abort();
//! ```

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Liveness flag shared between the host and the `/health` route
#[derive(Clone, Default)]
pub struct Health {
    stopping: Arc<AtomicBool>,
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Build the router without binding
    pub fn router(health: Health) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(health)
    }

    /// Start the metrics server on `addr`
    ///
    /// Bind failures are logged; the spout keeps running without the
    /// endpoint.
    pub fn start(addr: SocketAddr, health: Health) -> JoinHandle<()> {
        tokio::spawn(async move {
            let app = Self::router(health);

            info!(%addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn health_handler(State(health): State<Health>) -> impl IntoResponse {
    if health.is_stopping() {
        (StatusCode::SERVICE_UNAVAILABLE, "STOPPING")
    } else {
        (StatusCode::OK, "OK")
    }
}
