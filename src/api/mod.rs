pub mod data;
pub mod devices;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{metrics, registry::DeviceRegistry, store::TimeSeriesStore};

/// Dependencies handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TimeSeriesStore>,
    pub registry: Arc<DeviceRegistry>,
}

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/data/", post(data::record_data))
        .route("/data/read/", post(data::read_data))
        .route(
            "/devices/",
            post(devices::create_device).get(devices::read_devices),
        )
        .route(
            "/devices/:device_id",
            put(devices::update_device).delete(devices::delete_device),
        )
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "pass",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "fail",
                "version": env!("CARGO_PKG_VERSION"),
                "detail": e.to_string(),
            })),
        ),
    }
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
