//! API Server (Cold Path)
//!
//! Read-only monitoring endpoints for the asynchronous server. Handlers only
//! take snapshots; nothing here mutates the pool.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::infrastructure::metrics::{MetricsCollector, MetricsSnapshot};
use crate::server::{Dispatcher, ServerStatus};
use crate::Result;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<MetricsCollector>,
}

/// Build the router; split out so tests can drive it without a socket
pub fn router(dispatcher: Arc<Dispatcher>, metrics: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/metrics", get(get_metrics))
        .layer(CorsLayer::permissive())
        .with_state(AppState {
            dispatcher,
            metrics,
        })
}

/// Start the API server
pub async fn start_server(
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsCollector>,
    port: u16,
) -> Result<()> {
    let app = router(dispatcher, metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(target: "server", "API Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Handler for /api/status
async fn get_status(State(state): State<AppState>) -> Json<ServerStatus> {
    Json(state.dispatcher.status())
}

/// Handler for /api/metrics
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
