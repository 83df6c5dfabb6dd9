use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::{State, WebSocketUpgrade},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sandcastle_core::SyncConfig;
use serde_json::json;

use crate::{app::Application, bootstrap, sessions::SessionRegistry, socket};

pub struct AppState {
    pub static_dir: PathBuf,
    pub app_name: String,
    pub sync: SyncConfig,
    pub sessions: SessionRegistry,
    pub app: Arc<dyn Application>,
    pub metrics: PrometheusHandle,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(bootstrap::index))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .route("/*path", get(bootstrap::resource))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "sessions": state.sessions.len() }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket::handle_connection(socket, state))
}
