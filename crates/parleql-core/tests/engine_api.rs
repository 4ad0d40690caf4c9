//! Engine facade and management-operation coverage.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use parleql_core::config::{DatasourceConfig, Settings};
use parleql_core::db::{AdapterFactory, DatasourceAdapter};
use parleql_core::llm::{AgentConfig, LlmError};
use parleql_core::security::UserContext;
use parleql_core::{Engine, QueryRequest};

struct MapAdapterFactory {
    adapters: HashMap<String, Arc<TestAdapter>>,
}

impl AdapterFactory for MapAdapterFactory {
    fn create(&self, config: &DatasourceConfig) -> parleql_error::Result<Arc<dyn DatasourceAdapter>> {
        self.adapters
            .get(&config.id)
            .map(|a| a.clone() as Arc<dyn DatasourceAdapter>)
            .ok_or_else(|| parleql_error::EngineError::not_found(format!("adapter '{}'", config.id)))
    }
}

async fn engine_with_warehouse() -> (Engine, Arc<ScriptedChatModel>) {
    let model = ScriptedChatModel::new(|_, request| {
        if let Some(text) = ingress_response(request) {
            return Ok(text);
        }
        if request.system.contains("logical plan") {
            return Ok(warehouse_plan_json("my_postgres", "name"));
        }
        Err(LlmError::BadRequest { message: "unexpected prompt".into() })
    });
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    let factory = MapAdapterFactory {
        adapters: HashMap::from([(String::from("my_postgres"), adapter)]),
    };

    let settings = Settings {
        result_artifact_base_uri: tempfile::tempdir()
            .expect("tempdir")
            .keep()
            .display()
            .to_string(),
        ..test_settings()
    };
    let engine = Engine::builder(settings)
        .with_chat_factory(Arc::new(ScriptedChatFactory { model: model.clone() }))
        .with_adapter_factory(Arc::new(factory))
        .build()
        .await
        .expect("engine builds");

    engine
        .configure_llm(AgentConfig {
            provider: "scripted".into(),
            model: "scripted-small".into(),
            temperature: 0.0,
            seed: None,
            api_key: Some("sk-super-secret".into()),
        })
        .expect("configure llm");
    engine
        .add_datasource(datasource_config("my_postgres", "postgres"))
        .await
        .expect("add datasource");
    engine.set_policies(admin_policies());
    (engine, model)
}

#[tokio::test]
async fn run_query_returns_results_and_never_raises() {
    let (engine, _model) = engine_with_warehouse().await;
    engine.index_datasource("my_postgres").await.expect("index");

    let result = engine
        .run_query(QueryRequest {
            natural_language: "Top 5 customers by revenue".into(),
            datasource_id: None,
            execute: true,
            user_context: Some(UserContext::with_role("admin")),
        })
        .await;

    assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
    assert!(!result.trace_id.is_empty());
    assert!(!result.results.is_empty());
    assert!(result.sql.as_deref().is_some_and(|s| s.contains("SELECT")));
    assert!(result.final_answer.is_some());
    assert!(!result.reasoning.is_empty());
}

#[tokio::test]
async fn unknown_pinned_datasource_is_reported_not_raised() {
    let (engine, _model) = engine_with_warehouse().await;
    let result = engine
        .run_query(QueryRequest {
            natural_language: "anything".into(),
            datasource_id: Some("nope".into()),
            execute: true,
            user_context: Some(UserContext::with_role("admin")),
        })
        .await;
    assert!(!result.errors.is_empty());
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn llm_listing_is_secret_stripped() {
    let (engine, _model) = engine_with_warehouse().await;
    let config = engine.get_llm("default").expect("default agent");
    assert_eq!(config.api_key, None);
    for (_, agent) in engine.list_llms() {
        assert_eq!(agent.api_key, None);
    }
}

#[tokio::test]
async fn datasource_management_round_trips() {
    let (engine, _model) = engine_with_warehouse().await;
    let listed = engine.list_datasources();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "my_postgres");

    let stats = engine.index_datasource("my_postgres").await.expect("index stats");
    assert_eq!(stats.datasource_id, "my_postgres");
    assert!(stats.total > 0);
    assert!(stats.by_kind.contains_key("table"));
    assert!(stats.by_kind.contains_key("column"));

    // Re-indexing is idempotent.
    let again = engine.index_datasource("my_postgres").await.expect("index stats");
    assert_eq!(again.total, stats.total);

    let all = engine.index_all_datasources().await;
    assert!(all["my_postgres"].is_ok());

    engine.clear_index().await.expect("clear");
}

#[tokio::test]
async fn permissions_are_pure_and_settings_are_exposed() {
    let (engine, _model) = engine_with_warehouse().await;
    let ctx = UserContext::with_role("admin");
    for _ in 0..3 {
        assert!(engine.check_permissions(&ctx, "my_postgres", "customers"));
        assert!(!engine.check_permissions(&UserContext::with_role("nobody"), "my_postgres", "customers"));
    }
    let allowed = engine.get_allowed_resources(&ctx);
    assert!(allowed.datasources.contains("*"));

    assert!(engine.validate_configuration());
    assert_eq!(engine.get_setting("tenant_id").as_deref(), Some("default"));
    assert!(engine.get_current_settings().contains_key("global_timeout_sec"));
    assert!(engine.is_ready());
}
