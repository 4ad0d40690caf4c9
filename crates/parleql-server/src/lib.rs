//! Thin HTTP surface over the ParleQL engine.
//!
//! Request/response mapping only; all semantics live in `parleql-core`.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

mod error;
mod routes;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use parleql_core::Engine;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Shared handler state.
pub type AppState = Arc<Engine>;

/// Build the full router over an engine.
pub fn build_router(engine: AppState) -> Router {
    Router::new()
        .route("/query", post(routes::query::run_query))
        .route("/index/{id}", post(routes::index::index_datasource))
        .route("/index-all", post(routes::index::index_all))
        .route("/index", delete(routes::index::clear_index))
        .route(
            "/datasource",
            post(routes::datasource::add_datasource).get(routes::datasource::list_datasources),
        )
        .route("/llm", post(routes::llm::configure).get(routes::llm::list))
        .route("/llm/{name}", get(routes::llm::get))
        .route("/health", get(routes::health::health))
        .route("/ready", get(routes::health::ready))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
