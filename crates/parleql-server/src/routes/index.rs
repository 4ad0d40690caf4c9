//! `POST /index/{id}`, `POST /index-all`, `DELETE /index`.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use parleql_core::vector::IndexStats;
use serde::Serialize;

use crate::{ApiError, AppState};

pub async fn index_datasource(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexStats>, ApiError> {
    Ok(Json(engine.index_datasource(&id).await?))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum IndexOutcome {
    Stats(IndexStats),
    Error { error: String },
}

pub async fn index_all(State(engine): State<AppState>) -> Json<BTreeMap<String, IndexOutcome>> {
    let outcomes = engine
        .index_all_datasources()
        .await
        .into_iter()
        .map(|(id, outcome)| {
            let outcome = match outcome {
                Ok(stats) => IndexOutcome::Stats(stats),
                Err(error) => IndexOutcome::Error { error },
            };
            (id, outcome)
        })
        .collect();
    Json(outcomes)
}

pub async fn clear_index(State(engine): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    engine.clear_index().await.map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({"cleared": true})))
}
