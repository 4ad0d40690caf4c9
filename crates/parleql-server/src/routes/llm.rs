//! `POST /llm`, `GET /llm`, `GET /llm/{name}`.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use parleql_core::llm::AgentConfig;
use serde::Deserialize;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ConfigureRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub config: AgentConfig,
}

pub async fn configure(
    State(engine): State<AppState>,
    Json(request): Json<ConfigureRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = request.name.unwrap_or_else(|| String::from("default"));
    engine.configure_llm_named(&name, request.config)?;
    Ok(Json(serde_json::json!({"configured": name})))
}

pub async fn list(State(engine): State<AppState>) -> Json<BTreeMap<String, AgentConfig>> {
    // Secret-stripped by the gateway.
    Json(engine.list_llms().into_iter().collect())
}

pub async fn get(
    State(engine): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AgentConfig>, ApiError> {
    Ok(Json(engine.get_llm(&name)?))
}
