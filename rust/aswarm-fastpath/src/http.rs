// aswarm-fastpath: Health and metrics endpoints
//
// /healthz returns a fixed ok while the receive loop is live; /metrics
// renders the prometheus registry.

use crate::error::{FastPathError, FastPathResult};
use crate::listener::FastPathListener;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

async fn healthz(State(listener): State<Arc<FastPathListener>>) -> impl IntoResponse {
    if listener.is_live() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "receive loop not running")
    }
}

async fn metrics(State(listener): State<Arc<FastPathListener>>) -> impl IntoResponse {
    listener.stats().render()
}

/// Serve /healthz and /metrics until the task is cancelled
pub async fn serve_http(listener: Arc<FastPathListener>, addr: SocketAddr) -> FastPathResult<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(listener);

    let tcp = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| FastPathError::HttpError(format!("bind {}: {}", addr, e)))?;
    info!(addr = %addr, "health/metrics server started");

    axum::serve(tcp, app)
        .await
        .map_err(|e| FastPathError::HttpError(e.to_string()))
}
