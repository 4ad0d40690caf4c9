//! `GET /health`, `GET /ready`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub report: parleql_core::engine::HealthReport,
}

pub async fn health(State(engine): State<AppState>) -> impl IntoResponse {
    let report = engine.health().await;
    let degraded = report.datasources.values().any(|healthy| !healthy);
    let status = if degraded { "degraded" } else { "ok" };
    let code = if degraded { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (code, Json(HealthResponse { status: status.into(), report }))
}

pub async fn ready(State(engine): State<AppState>) -> impl IntoResponse {
    if engine.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({"ready": true})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"ready": false})))
    }
}
