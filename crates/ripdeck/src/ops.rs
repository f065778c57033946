//! Operations endpoints, served beside the panel protocol.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};

use crate::station::{HealthSnapshot, Station};

async fn health_check(State(station): State<Arc<Station>>) -> Json<HealthSnapshot> {
    Json(station.health())
}

async fn shutdown(State(station): State<Arc<Station>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    station.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(station: Arc<Station>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .with_state(station)
}
