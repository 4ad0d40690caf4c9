//! Route smoke tests over an unconfigured engine.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use parleql_core::config::Settings;
use parleql_core::Engine;
use tower::ServiceExt;

async fn router() -> axum::Router {
    let engine = Engine::builder(Settings::default()).build().await.expect("engine builds");
    parleql_server::build_router(Arc::new(engine))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn ready_reports_unconfigured_engine() {
    let response = router()
        .await
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], serde_json::json!(false));
}

#[tokio::test]
async fn health_is_ok_with_no_datasources() {
    let response = router()
        .await
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], serde_json::json!("ok"));
    assert_eq!(body["llm_configured"], serde_json::json!(false));
}

#[tokio::test]
async fn unknown_llm_maps_to_404() {
    let response = router()
        .await
        .oneshot(Request::get("/llm/ghost").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn datasource_listing_starts_empty() {
    let response = router()
        .await
        .oneshot(Request::get("/datasource").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn query_failures_travel_in_the_body_not_the_status() {
    let request = Request::post("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"natural_language": "top customers"}"#))
        .unwrap();
    let response = router().await.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(!body["errors"].as_array().unwrap().is_empty());
    assert!(!body["trace_id"].as_str().unwrap().is_empty());
}
