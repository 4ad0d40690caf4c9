//! Test doubles: scripted chat models, table-backed adapters with failure
//! injection, and a fully wired `PipelineDeps`.

// Each test binary uses a different slice of these helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use parleql_core::artifact::LocalFsArtifactStore;
use parleql_core::config::{ConnectionConfig, DatasourceConfig, Settings};
use parleql_core::db::{
    AdapterCapabilities, AdapterError, AdapterRegistry, DatasourceAdapter, DryRunReport, EngineType,
    ExecLimits, QueryRows,
};
use parleql_core::llm::{AgentConfig, ChatCompletion, ChatModel, ChatModelFactory, ChatRequest, LlmError, LlmGateway};
use parleql_core::observability::{AuditLog, MemoryMeter};
use parleql_core::pipeline::{PipelineDeps, PipelineRuntime};
use parleql_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
use parleql_core::sandbox::SandboxManager;
use parleql_core::schema::{ColumnSchema, ForeignKey, MemorySchemaStore, SchemaSnapshot, SchemaStore, TableSchema};
use parleql_core::security::{PolicySet, RolePolicy};
use parleql_core::vector::{MemoryVectorIndex, VectorGateway};

// ---------------------------------------------------------------------
// Chat model double
// ---------------------------------------------------------------------

type Responder = dyn Fn(u32, &ChatRequest) -> Result<String, LlmError> + Send + Sync;

pub struct ScriptedChatModel {
    calls: AtomicU32,
    responder: Box<Responder>,
}

impl ScriptedChatModel {
    pub fn new(responder: impl Fn(u32, &ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), responder: Box::new(responder) })
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let text = (self.responder)(call, &request)?;
        Ok(ChatCompletion { text, prompt_tokens: 10, completion_tokens: 20 })
    }
}

pub struct ScriptedChatFactory {
    pub model: Arc<ScriptedChatModel>,
}

impl ChatModelFactory for ScriptedChatFactory {
    fn create(&self, _config: &AgentConfig) -> parleql_error::Result<Arc<dyn ChatModel>> {
        Ok(self.model.clone())
    }
}

/// Default handling for the ingress prompts; returns `None` for prompts the
/// per-test responder should own (planning, decomposition).
pub fn ingress_response(request: &ChatRequest) -> Option<String> {
    if request.system.contains("You normalize") {
        return Some(
            serde_json::json!({"normalized": request.user, "entities": [], "hints": []}).to_string(),
        );
    }
    if request.system.contains("safety gate") {
        return Some(serde_json::json!({"allowed": true, "reason": "analytics"}).to_string());
    }
    None
}

// ---------------------------------------------------------------------
// Adapter double
// ---------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum AdapterBehaviour {
    Ok,
    Unavailable,
    Hang,
}

pub struct TestAdapter {
    pub id: String,
    pub snapshot: SchemaSnapshot,
    pub caps: AdapterCapabilities,
    pub rows: QueryRows,
    pub behaviour: RwLock<AdapterBehaviour>,
    pub execute_calls: AtomicU32,
    pub dry_run_calls: AtomicU32,
}

impl TestAdapter {
    pub fn new(snapshot: SchemaSnapshot, rows: QueryRows) -> Arc<Self> {
        let mut caps = AdapterCapabilities::defaults_for(snapshot.engine_type);
        // The doubles answer canned rows; engine-side validation is noise.
        caps.supports_dry_run = false;
        caps.supports_cost_estimate = false;
        Arc::new(Self {
            id: snapshot.datasource_id.clone(),
            snapshot,
            caps,
            rows,
            behaviour: RwLock::new(AdapterBehaviour::Ok),
            execute_calls: AtomicU32::new(0),
            dry_run_calls: AtomicU32::new(0),
        })
    }

    pub fn set_behaviour(&self, behaviour: AdapterBehaviour) {
        *self.behaviour.write() = behaviour;
    }
}

#[async_trait]
impl DatasourceAdapter for TestAdapter {
    fn datasource_id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> AdapterCapabilities {
        self.caps
    }

    async fn fetch_schema(&self) -> Result<SchemaSnapshot, AdapterError> {
        Ok(self.snapshot.clone())
    }

    async fn execute(&self, _sql: &str, _limits: &ExecLimits) -> Result<QueryRows, AdapterError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = *self.behaviour.read();
        match behaviour {
            AdapterBehaviour::Ok => Ok(self.rows.clone()),
            AdapterBehaviour::Unavailable => {
                Err(AdapterError::Unavailable { message: "connection refused".into() })
            },
            AdapterBehaviour::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            },
        }
    }

    async fn dry_run(&self, _sql: &str) -> Result<DryRunReport, AdapterError> {
        self.dry_run_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DryRunReport { ok: true, estimated_rows: Some(1), message: None })
    }

    async fn cost_estimate(&self, _sql: &str) -> Result<f64, AdapterError> {
        Ok(1.0)
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------

pub fn column(name: &str, data_type: &str) -> ColumnSchema {
    ColumnSchema { name: name.into(), data_type: data_type.into(), nullable: false, description: None }
}

/// customers / sales_orders / sales_items on one Postgres datasource.
pub fn warehouse_snapshot(datasource_id: &str) -> SchemaSnapshot {
    SchemaSnapshot {
        datasource_id: datasource_id.into(),
        engine_type: EngineType::Postgres,
        tables: vec![
            TableSchema {
                name: "customers".into(),
                description: Some("customer master data".into()),
                columns: vec![column("id", "bigint"), column("name", "text")],
                foreign_keys: vec![],
            },
            TableSchema {
                name: "sales_orders".into(),
                description: None,
                columns: vec![column("id", "bigint"), column("customer_id", "bigint")],
                foreign_keys: vec![ForeignKey {
                    column: "customer_id".into(),
                    references_table: "customers".into(),
                    references_column: "id".into(),
                }],
            },
            TableSchema {
                name: "sales_items".into(),
                description: None,
                columns: vec![column("id", "bigint"), column("order_id", "bigint"), column("amount", "numeric")],
                foreign_keys: vec![ForeignKey {
                    column: "order_id".into(),
                    references_table: "sales_orders".into(),
                    references_column: "id".into(),
                }],
            },
        ],
    }
}

/// A one-table sales snapshot for a named store.
pub fn store_snapshot(datasource_id: &str, engine_type: EngineType) -> SchemaSnapshot {
    SchemaSnapshot {
        datasource_id: datasource_id.into(),
        engine_type,
        tables: vec![TableSchema {
            name: "sales".into(),
            description: Some("store sales".into()),
            columns: vec![column("region", "text"), column("amount", "numeric")],
            foreign_keys: vec![],
        }],
    }
}

pub fn datasource_config(id: &str, engine: &str) -> DatasourceConfig {
    DatasourceConfig {
        id: id.into(),
        description: Some(format!("{id} datasource")),
        connection: ConnectionConfig { kind: engine.into(), params: Default::default() },
        statement_timeout_ms: None,
        row_limit: None,
        max_bytes: None,
        examples: vec![],
    }
}

pub fn admin_policies() -> Vec<RolePolicy> {
    vec![RolePolicy {
        role: "admin".into(),
        description: "everything".into(),
        allowed_datasources: vec!["*".into()],
        allowed_tables: vec!["*".into()],
    }]
}

// ---------------------------------------------------------------------
// Environment wiring
// ---------------------------------------------------------------------

pub struct TestEnv {
    pub deps: Arc<PipelineDeps>,
    pub runtime: PipelineRuntime,
    pub meter: Arc<MemoryMeter>,
    pub model: Arc<ScriptedChatModel>,
    pub audit_path: std::path::PathBuf,
    // Keeps the artifact directory and audit sink alive for the test.
    pub _artifact_dir: tempfile::TempDir,
    pub _audit: AuditLog,
}

pub fn test_settings() -> Settings {
    Settings {
        router_l1_threshold: 0.2,
        router_l2_threshold: 0.05,
        sql_agent_max_retries: 3,
        sql_agent_retry_base_delay_sec: 0.0,
        sql_agent_retry_max_delay_sec: 0.0,
        sql_agent_retry_jitter_delay_sec: 0.0,
        ..Default::default()
    }
}

/// Wire a full pipeline over doubles. Schemas are registered and indexed.
pub async fn build_env(
    settings: Settings,
    model: Arc<ScriptedChatModel>,
    adapters: Vec<(DatasourceConfig, Arc<TestAdapter>)>,
    policies: Vec<RolePolicy>,
    db_breaker_config: CircuitBreakerConfig,
) -> TestEnv {
    let meter = Arc::new(MemoryMeter::new());
    let schema_store: Arc<dyn SchemaStore> = Arc::new(MemorySchemaStore::new(5));
    let artifact_dir = tempfile::tempdir().expect("tempdir");
    let audit_path = artifact_dir.path().join("audit.log");
    let audit = AuditLog::open(&audit_path, 0).expect("audit log");

    let llm_breaker = Arc::new(CircuitBreaker::new(
        "llm",
        CircuitBreakerConfig::default(),
        meter.clone(),
    ));
    let vector_breaker = Arc::new(CircuitBreaker::new(
        "vector",
        CircuitBreakerConfig::default(),
        meter.clone(),
    ));
    let db_breaker = Arc::new(CircuitBreaker::new("db", db_breaker_config, meter.clone()));

    let llm = LlmGateway::new(
        Arc::new(ScriptedChatFactory { model: model.clone() }),
        llm_breaker,
        audit.handle(),
        meter.clone(),
    );
    llm.configure(
        "default",
        AgentConfig {
            provider: "scripted".into(),
            model: "scripted-small".into(),
            temperature: 0.0,
            seed: Some(7),
            api_key: None,
        },
    )
    .expect("configure llm");

    let index = Arc::new(MemoryVectorIndex::new());
    let vector = VectorGateway::new(
        index,
        schema_store.clone(),
        vector_breaker,
        settings.router_l1_threshold,
        settings.router_l2_threshold,
        settings.schema_version_mismatch_policy,
    );

    let registry = AdapterRegistry::new();
    for (config, adapter) in &adapters {
        registry.register(config.clone(), adapter.clone());
        let version = schema_store.register(adapter.snapshot.clone()).expect("register schema");
        vector
            .index_snapshot(&adapter.snapshot, &version, config.description.as_deref(), &config.examples)
            .await
            .expect("index schema");
    }

    let sandbox = SandboxManager::new(2, 1, meter.clone());
    let artifacts = Arc::new(LocalFsArtifactStore::new(artifact_dir.path().join("artifacts"), None));

    let deps = Arc::new(PipelineDeps {
        settings,
        policies: RwLock::new(PolicySet::new(policies)),
        registry,
        schema_store,
        vector,
        llm,
        sandbox,
        artifacts,
        db_breaker,
        meter: meter.clone(),
    });

    TestEnv {
        runtime: PipelineRuntime::new(deps.clone()),
        deps,
        meter,
        model,
        audit_path,
        _artifact_dir: artifact_dir,
        _audit: audit,
    }
}

/// The canned happy-path plan for the warehouse schema.
pub fn warehouse_plan_json(datasource_id: &str, name_column: &str) -> String {
    serde_json::json!({
        "statement_type": "select",
        "datasource_id": datasource_id,
        "from": {"table": "customers", "alias": "c"},
        "joins": [
            {"table": {"table": "sales_orders", "alias": "o"}, "kind": "inner",
             "on": {"type": "binary", "op": "eq",
                    "left": {"type": "column", "table": "c", "name": "id"},
                    "right": {"type": "column", "table": "o", "name": "customer_id"}}},
            {"table": {"table": "sales_items", "alias": "i"}, "kind": "inner",
             "on": {"type": "binary", "op": "eq",
                    "left": {"type": "column", "table": "o", "name": "id"},
                    "right": {"type": "column", "table": "i", "name": "order_id"}}}
        ],
        "select_items": [
            {"expr": {"type": "column", "table": "c", "name": name_column}, "alias": null},
            {"expr": {"type": "aggregate", "func": "sum",
                      "arg": {"type": "column", "table": "i", "name": "amount"}, "distinct": false},
             "alias": "revenue"}
        ],
        "filter": null,
        "group_by": [{"type": "column", "table": "c", "name": name_column}],
        "order_by": [{"expr": {"type": "column", "table": null, "name": "revenue"}, "descending": true}],
        "limit": 5
    })
    .to_string()
}

/// A trivial single-table plan over a store's `sales` table.
pub fn store_plan_json(datasource_id: &str) -> String {
    serde_json::json!({
        "statement_type": "select",
        "datasource_id": datasource_id,
        "from": {"table": "sales", "alias": null},
        "joins": [],
        "select_items": [
            {"expr": {"type": "column", "table": null, "name": "region"}, "alias": null},
            {"expr": {"type": "column", "table": null, "name": "amount"}, "alias": null}
        ],
        "filter": null,
        "group_by": [],
        "order_by": [],
        "limit": null
    })
    .to_string()
}

pub fn sales_rows() -> QueryRows {
    QueryRows {
        columns: vec!["name".into(), "revenue".into()],
        rows: vec![
            vec![serde_json::json!("acme"), serde_json::json!(1200.5)],
            vec![serde_json::json!("globex"), serde_json::json!(640.0)],
            vec![serde_json::json!("initech"), serde_json::json!(310.0)],
        ],
    }
}
