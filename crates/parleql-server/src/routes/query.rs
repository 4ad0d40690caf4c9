//! `POST /query`.

use axum::extract::State;
use axum::Json;
use parleql_core::{QueryRequest, QueryResult};

use crate::AppState;

pub async fn run_query(
    State(engine): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResult> {
    // run_query never fails; errors travel inside the result body.
    Json(engine.run_query(request).await)
}
