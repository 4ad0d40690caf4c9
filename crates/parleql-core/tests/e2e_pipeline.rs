//! End-to-end pipeline scenarios over in-memory doubles.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use parleql_core::llm::LlmError;
use parleql_core::resilience::CircuitBreakerConfig;
use parleql_core::security::{RolePolicy, UserContext};
use parleql_core::{ErrorCode, Severity};

fn happy_responder(datasource_id: &'static str) -> Arc<ScriptedChatModel> {
    ScriptedChatModel::new(move |_, request| {
        if let Some(text) = ingress_response(request) {
            return Ok(text);
        }
        if request.system.contains("logical plan") {
            return Ok(warehouse_plan_json(datasource_id, "name"));
        }
        Err(LlmError::BadRequest { message: format!("unexpected prompt: {}", request.system) })
    })
}

/// S1: single-datasource happy path.
#[tokio::test]
async fn single_datasource_happy_path() {
    let model = happy_responder("my_postgres");
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    let env = build_env(
        test_settings(),
        model.clone(),
        vec![(datasource_config("my_postgres", "postgres"), adapter)],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run(
            "Top 5 customers by revenue last quarter".into(),
            None,
            true,
            UserContext::with_role("admin"),
        )
        .await;

    assert!(state.errors.is_empty(), "unexpected errors: {:?}", state.errors);
    assert!(!state.ctx.trace_id.is_empty());
    let sql = state.sql_draft.as_deref().expect("sql generated");
    assert!(sql.contains("customers") && sql.contains("sales_orders") && sql.contains("sales_items"));
    let frame = state.execution.as_ref().expect("aggregated frame");
    assert!(frame.num_rows <= 5);
    assert!(frame.num_rows > 0);
    assert!(state.final_answer.as_deref().is_some_and(|a| !a.is_empty()));

    // Aggregation is deterministic code: semantic + intent + planner are
    // the only model calls on this path (single candidate skips the
    // decomposer model).
    assert_eq!(model.call_count(), 3);
}

/// S2: cross-datasource fan-out with a union aggregation.
#[tokio::test]
async fn cross_datasource_fan_out() {
    let model = ScriptedChatModel::new(|_, request| {
        if let Some(text) = ingress_response(request) {
            return Ok(text);
        }
        if request.system.contains("split an analytics question") {
            return Ok(serde_json::json!({
                "sub_queries": [
                    {"id": "us", "text": "sales in the US store", "datasource_id": "us_store", "depends_on": []},
                    {"id": "eu", "text": "sales in the EU store", "datasource_id": "eu_store", "depends_on": []}
                ],
                "combine": {"op": "union", "join_on": [], "order_by": [], "limit": null}
            })
            .to_string());
        }
        if request.system.contains("logical plan") {
            let ds = if request.user.contains("Datasource: us_store") { "us_store" } else { "eu_store" };
            return Ok(store_plan_json(ds));
        }
        Err(LlmError::BadRequest { message: "unexpected prompt".into() })
    });

    let us_rows = parleql_core::db::QueryRows {
        columns: vec!["region".into(), "amount".into()],
        rows: vec![vec![serde_json::json!("us"), serde_json::json!(100.0)]],
    };
    let eu_rows = parleql_core::db::QueryRows {
        columns: vec!["region".into(), "amount".into()],
        rows: vec![vec![serde_json::json!("eu"), serde_json::json!(80.0)]],
    };
    let us = TestAdapter::new(store_snapshot("us_store", parleql_core::db::EngineType::Postgres), us_rows);
    let eu = TestAdapter::new(store_snapshot("eu_store", parleql_core::db::EngineType::Mysql), eu_rows);

    let env = build_env(
        test_settings(),
        model,
        vec![
            (datasource_config("us_store", "postgres"), us),
            (datasource_config("eu_store", "mysql"), eu),
        ],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run(
            "Compare sales in US Store (Postgres) vs EU Store (MySQL)".into(),
            None,
            true,
            UserContext::with_role("admin"),
        )
        .await;

    assert!(state.errors.is_empty(), "unexpected errors: {:?}", state.errors);
    assert_eq!(state.sub_queries.len(), 2);
    let bound: Vec<&str> = state.sub_queries.iter().map(|sq| sq.datasource_id.as_str()).collect();
    assert!(bound.contains(&"us_store") && bound.contains(&"eu_store"));
    let frame = state.execution.as_ref().expect("union frame");
    assert_eq!(frame.num_rows, 2);
    // MySQL dialect for the EU sub-query, Postgres for the US one.
    let sqls: Vec<&str> = state.sub_results.values().filter_map(|o| o.sql()).collect();
    assert!(sqls.iter().any(|sql| sql.contains('`')));
    assert!(sqls.iter().any(|sql| sql.contains('"')));
}

/// S3: RBAC denial is fatal, generates no SQL and submits no sandbox task.
#[tokio::test]
async fn rbac_denial_blocks_before_execution() {
    let model = ScriptedChatModel::new(|_, request| {
        if let Some(text) = ingress_response(request) {
            return Ok(text);
        }
        if request.system.contains("logical plan") {
            // References the forbidden payroll table.
            return Ok(serde_json::json!({
                "statement_type": "select",
                "datasource_id": "finance",
                "from": {"table": "payroll", "alias": null},
                "joins": [],
                "select_items": [
                    {"expr": {"type": "column", "table": null, "name": "amount"}, "alias": null}
                ],
                "filter": null,
                "group_by": [],
                "order_by": [],
                "limit": null
            })
            .to_string());
        }
        Err(LlmError::BadRequest { message: "unexpected prompt".into() })
    });

    let mut snapshot = warehouse_snapshot("finance");
    snapshot.tables.push(parleql_core::schema::TableSchema {
        name: "payroll".into(),
        description: None,
        columns: vec![column("amount", "numeric")],
        foreign_keys: vec![],
    });
    let adapter = TestAdapter::new(snapshot, sales_rows());
    let policies = vec![RolePolicy {
        role: "analyst".into(),
        description: "no payroll".into(),
        allowed_datasources: vec!["finance".into()],
        allowed_tables: vec!["finance.customers".into(), "finance.sales_orders".into()],
    }];

    let env = build_env(
        test_settings(),
        model,
        vec![(datasource_config("finance", "postgres"), adapter.clone())],
        policies,
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run("Show me everyone's payroll".into(), None, true, UserContext::with_role("analyst"))
        .await;

    assert!(state.errors.iter().any(|e| e.code == ErrorCode::SecurityViolation));
    assert!(state.sql_draft.is_none(), "no SQL may be generated after a security violation");
    assert_eq!(adapter.execute_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(adapter.dry_run_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// S4: DB outage opens the breaker; the next request degrades fast with
/// the would-have-run SQL.
#[tokio::test]
async fn db_breaker_open_degrades_with_sql() {
    let model = happy_responder("my_postgres");
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    adapter.set_behaviour(AdapterBehaviour::Unavailable);

    let env = build_env(
        test_settings(),
        model,
        vec![(datasource_config("my_postgres", "postgres"), adapter.clone())],
        admin_policies(),
        CircuitBreakerConfig { fail_max: 2, reset_timeout: Duration::from_secs(60) },
    )
    .await;

    // Two failing requests trip the breaker (ADAPTER_UNAVAILABLE is
    // non-retryable, so each request contributes one counted failure).
    for _ in 0..2 {
        let state = env
            .runtime
            .run("Top customers".into(), None, true, UserContext::with_role("admin"))
            .await;
        assert!(state.errors.iter().any(|e| e.code == ErrorCode::AdapterUnavailable));
    }

    let started = Instant::now();
    let state = env
        .runtime
        .run("Top customers".into(), None, true, UserContext::with_role("admin"))
        .await;
    let elapsed = started.elapsed();

    assert!(state.errors.iter().any(|e| e.code == ErrorCode::BreakerOpen));
    let answer = state.final_answer.as_deref().expect("degraded answer");
    assert!(answer.contains("would have executed"));
    assert!(answer.contains("SELECT"), "answer should embed the SQL: {answer}");
    assert!(state.execution.is_none());
    // Fail-fast: no third adapter call happened.
    assert_eq!(adapter.execute_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(elapsed < Duration::from_millis(500), "breaker-open path took {elapsed:?}");
}

/// S5: the refiner loop recovers from an invalid first plan.
#[tokio::test]
async fn refiner_loop_recovers_bad_column() {
    let model = ScriptedChatModel::new(|_, request| {
        if let Some(text) = ingress_response(request) {
            return Ok(text);
        }
        if request.system.contains("logical plan") {
            // First planning attempt references a bogus column; the
            // feedback-carrying retry uses the real one.
            if request.user.contains("Previous attempt failed") {
                return Ok(warehouse_plan_json("my_postgres", "name"));
            }
            return Ok(warehouse_plan_json("my_postgres", "usr_id"));
        }
        Err(LlmError::BadRequest { message: "unexpected prompt".into() })
    });
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    let env = build_env(
        test_settings(),
        model,
        vec![(datasource_config("my_postgres", "postgres"), adapter)],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run("Top 5 customers by revenue".into(), None, true, UserContext::with_role("admin"))
        .await;

    assert!(state.execution.is_some(), "second attempt must succeed: {:?}", state.errors);
    assert!(state.errors.iter().all(|e| e.severity == Severity::Warning));
    assert!(state
        .errors
        .iter()
        .any(|e| e.code == ErrorCode::LogicalValidationFailed));
    assert_eq!(state.retry_count.get("sq_0"), Some(&1));
    assert!(state.retry_count["sq_0"] <= env.deps.settings.sql_agent_max_retries);
}

/// S6: a hung adapter cannot outlive the global deadline.
#[tokio::test]
async fn global_timeout_is_a_hard_cap() {
    let model = happy_responder("my_postgres");
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    adapter.set_behaviour(AdapterBehaviour::Hang);

    let settings = parleql_core::config::Settings { global_timeout_sec: 1, ..test_settings() };
    let env = build_env(
        settings,
        model,
        vec![(datasource_config("my_postgres", "postgres"), adapter)],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let started = Instant::now();
    let state = env
        .runtime
        .run("Top customers".into(), None, true, UserContext::with_role("admin"))
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(5), "request took {elapsed:?}");
    assert!(state.errors.iter().any(|e| e.code == ErrorCode::PipelineTimeout));
    // Partial progress survives the timeout.
    assert!(!state.reasoning.is_empty());
    assert!(state.final_answer.is_some());
}

/// The execute=false flag produces SQL without touching the sandbox.
#[tokio::test]
async fn execute_false_reports_sql_only() {
    let model = happy_responder("my_postgres");
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    let env = build_env(
        test_settings(),
        model,
        vec![(datasource_config("my_postgres", "postgres"), adapter.clone())],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run("Top customers".into(), None, false, UserContext::with_role("admin"))
        .await;

    assert!(state.errors.is_empty(), "unexpected errors: {:?}", state.errors);
    assert!(state.sql_draft.is_some());
    assert!(state.execution.is_none());
    assert!(state.final_answer.as_deref().is_some_and(|a| a.contains("SQL")));
    assert_eq!(adapter.execute_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// Audit records carry the request's trace id.
#[tokio::test]
async fn audit_records_share_the_trace_id() {
    let model = happy_responder("my_postgres");
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    let env = build_env(
        test_settings(),
        model,
        vec![(datasource_config("my_postgres", "postgres"), adapter)],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run("Top customers".into(), None, true, UserContext::with_role("admin"))
        .await;
    assert!(state.errors.is_empty());

    env._audit.handle().flush().await;
    let contents = std::fs::read_to_string(&env.audit_path).expect("audit file");
    let lines: Vec<&str> = contents.lines().collect();
    assert!(!lines.is_empty(), "llm interactions must be audited");
    for line in lines {
        let record: serde_json::Value = serde_json::from_str(line).expect("json line");
        assert_eq!(record["trace_id"], serde_json::json!(state.ctx.trace_id));
    }
}

/// Pinned datasource skips routing.
#[tokio::test]
async fn pinned_datasource_skips_routing() {
    let model = happy_responder("my_postgres");
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    let env = build_env(
        test_settings(),
        model.clone(),
        vec![(datasource_config("my_postgres", "postgres"), adapter)],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run(
            "Top customers".into(),
            Some("my_postgres".into()),
            true,
            UserContext::with_role("admin"),
        )
        .await;

    assert!(state.errors.is_empty());
    assert_eq!(state.sub_queries.len(), 1);
    assert_eq!(state.sub_queries[0].datasource_id, "my_postgres");
}

/// Token usage lands in the meter.
#[tokio::test]
async fn token_usage_is_counted() {
    let model = happy_responder("my_postgres");
    let adapter = TestAdapter::new(warehouse_snapshot("my_postgres"), sales_rows());
    let env = build_env(
        test_settings(),
        model,
        vec![(datasource_config("my_postgres", "postgres"), adapter)],
        admin_policies(),
        CircuitBreakerConfig::default(),
    )
    .await;

    let state = env
        .runtime
        .run("Top customers".into(), None, true, UserContext::with_role("admin"))
        .await;
    assert!(state.errors.is_empty());

    // 3 calls x 30 tokens each.
    let total = env.meter.counter_value("token.usage", "default")
        + env.meter.counter_value("token.usage", "planner")
        + env.meter.counter_value("token.usage", "intent_validator");
    assert_eq!(total, 90);
}
