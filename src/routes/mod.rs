// HTTP + WebSocket host for the aggregator's message handler

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::aggregator::AggregatorHandle;
use crate::config::AppConfig;
use crate::models::Sample;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) aggregator: AggregatorHandle,
    pub(crate) samples_tx: broadcast::Sender<Sample>,
    pub(crate) config: AppConfig,
}

pub fn app(
    aggregator: AggregatorHandle,
    samples_tx: broadcast::Sender<Sample>,
    config: AppConfig,
) -> Router {
    let state = AppState {
        aggregator,
        samples_tx,
        config,
    };
    Router::new()
        .route("/", get(|| async { crate::version::banner() })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/message", post(http::message_handler)) // POST /api/message
        .route("/api/current", get(http::current_handler)) // GET /api/current
        .route("/api/summary", get(http::summary_handler)) // GET /api/summary
        .route("/ws/samples", get(ws::ws_samples)) // WS /ws/samples
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
