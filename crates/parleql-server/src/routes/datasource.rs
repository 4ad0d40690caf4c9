//! `POST /datasource`, `GET /datasource`.

use axum::extract::State;
use axum::Json;
use parleql_core::config::DatasourceConfig;
use serde::Serialize;

use crate::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct AddDatasourceResponse {
    pub id: String,
    pub schema_version: String,
}

pub async fn add_datasource(
    State(engine): State<AppState>,
    Json(config): Json<DatasourceConfig>,
) -> Result<Json<AddDatasourceResponse>, ApiError> {
    let id = config.id.clone();
    let schema_version = engine.add_datasource(config).await?;
    Ok(Json(AddDatasourceResponse { id, schema_version }))
}

pub async fn list_datasources(State(engine): State<AppState>) -> Json<Vec<DatasourceConfig>> {
    Json(engine.list_datasources())
}
