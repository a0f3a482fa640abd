// scrawl-server: the authoritative side of the sync protocol.

pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod ws;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use registry::SessionRegistry;

/// Full application router: health endpoint plus the sync WebSocket.
pub fn app(registry: Arc<SessionRegistry>) -> Router {
    Router::new().route("/healthz", get(healthz)).merge(ws::router(registry))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
