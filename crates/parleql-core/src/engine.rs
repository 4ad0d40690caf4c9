//! The engine facade: request entry point and management operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use parleql_error::{EngineError, PipelineError, Result};
use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactStore, LocalFsArtifactStore};
use crate::config::{
    DatasourceConfig, DatasourcesFile, LlmFile, PoliciesFile, SecretResolver, SecretsFile, Settings,
};
use crate::db::{AdapterFactory, AdapterRegistry};
use crate::llm::{AgentConfig, ChatModelFactory, LlmGateway};
use crate::observability::{AuditLog, Meter, TracingMeter};
use crate::pipeline::state::{ReasoningStep, SubQueryOutcome};
use crate::pipeline::{PipelineDeps, PipelineRuntime};
use crate::resilience::{BreakerState, CancellationToken, CircuitBreaker, CircuitBreakerConfig};
use crate::sandbox::{PoolKind, SandboxManager, TaskEnvelope, TaskMode, TaskOutput};
use crate::schema::{FileSchemaStore, MemorySchemaStore, SchemaStore};
use crate::security::{AllowedResources, PolicySet, RolePolicy, UserContext};
use crate::vector::{IndexStats, MemoryVectorIndex, VectorGateway, VectorIndex};

/// One query request.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub natural_language: String,
    #[serde(default)]
    pub datasource_id: Option<String>,
    #[serde(default = "default_execute")]
    pub execute: bool,
    #[serde(default)]
    pub user_context: Option<UserContext>,
}

fn default_execute() -> bool {
    true
}

impl QueryRequest {
    pub fn new(natural_language: impl Into<String>) -> Self {
        Self {
            natural_language: natural_language.into(),
            datasource_id: None,
            execute: true,
            user_context: None,
        }
    }
}

/// What `run_query` returns. Failures live inside `errors`; the call
/// itself never fails.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub results: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    pub errors: Vec<PipelineError>,
    pub warnings: Vec<String>,
    pub trace_id: String,
    pub reasoning: Vec<ReasoningStep>,
}

/// Breaker and datasource health, for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub datasources: BTreeMap<String, bool>,
    pub breakers: BTreeMap<String, String>,
    pub llm_configured: bool,
}

/// Builder for [`Engine`]. Providers (chat models, adapters, the vector
/// index) are injected here; everything else is wired from settings.
pub struct EngineBuilder {
    settings: Settings,
    chat_factory: Option<Arc<dyn ChatModelFactory>>,
    adapter_factory: Option<Arc<dyn AdapterFactory>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    meter: Option<Arc<dyn Meter>>,
}

struct UnconfiguredChatFactory;

impl ChatModelFactory for UnconfiguredChatFactory {
    fn create(&self, _config: &AgentConfig) -> Result<Arc<dyn crate::llm::ChatModel>> {
        Err(EngineError::config("no chat model provider is linked into this build"))
    }
}

struct UnconfiguredAdapterFactory;

impl AdapterFactory for UnconfiguredAdapterFactory {
    fn create(&self, config: &DatasourceConfig) -> Result<Arc<dyn crate::db::DatasourceAdapter>> {
        Err(EngineError::config(format!(
            "no adapter provider is linked for datasource '{}'",
            config.id
        )))
    }
}

impl EngineBuilder {
    pub fn new(settings: Settings) -> Self {
        Self { settings, chat_factory: None, adapter_factory: None, vector_index: None, meter: None }
    }

    #[must_use]
    pub fn with_chat_factory(mut self, factory: Arc<dyn ChatModelFactory>) -> Self {
        self.chat_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn with_adapter_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.adapter_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_meter(mut self, meter: Arc<dyn Meter>) -> Self {
        self.meter = Some(meter);
        self
    }

    /// Wire everything and load the configured files.
    pub async fn build(self) -> Result<Engine> {
        let settings = self.settings;
        settings.validate()?;

        let meter = self.meter.unwrap_or_else(|| Arc::new(TracingMeter));
        let schema_store: Arc<dyn SchemaStore> = match settings.schema_store_backend.as_str() {
            "file" => Arc::new(FileSchemaStore::new(
                settings.schema_store_path.clone(),
                settings.schema_store_max_versions,
            )?),
            _ => Arc::new(MemorySchemaStore::new(settings.schema_store_max_versions)),
        };
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(LocalFsArtifactStore::new(
            settings.result_artifact_base_uri.clone(),
            settings.result_artifact_path_template.clone(),
        ));

        let llm_breaker = Arc::new(CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig::default(),
            Arc::clone(&meter),
        ));
        let vector_breaker = Arc::new(CircuitBreaker::new(
            "vector",
            CircuitBreakerConfig::default(),
            Arc::clone(&meter),
        ));
        let db_breaker = Arc::new(CircuitBreaker::new(
            "db",
            CircuitBreakerConfig::default(),
            Arc::clone(&meter),
        ));

        let audit = match &settings.audit_log_path {
            Some(path) => AuditLog::open(path, 64 * 1024 * 1024)?,
            None => AuditLog::disabled(),
        };

        let secret_resolver = match &settings.secrets_config {
            Some(path) => {
                let file = SecretsFile::load(path)?;
                SecretResolver::from_configs(&file.providers)?
            },
            None => SecretResolver::with_env(),
        };

        let llm = LlmGateway::new(
            self.chat_factory.unwrap_or_else(|| Arc::new(UnconfiguredChatFactory)),
            Arc::clone(&llm_breaker),
            audit.handle(),
            Arc::clone(&meter),
        );
        let vector = VectorGateway::new(
            self.vector_index.unwrap_or_else(|| Arc::new(MemoryVectorIndex::new())),
            Arc::clone(&schema_store),
            Arc::clone(&vector_breaker),
            settings.router_l1_threshold,
            settings.router_l2_threshold,
            settings.schema_version_mismatch_policy,
        );
        let sandbox = SandboxManager::new(
            settings.sandbox_exec_workers,
            settings.sandbox_index_workers,
            Arc::clone(&meter),
        );

        let policies = match &settings.policies_config {
            Some(path) => PolicySet::new(PoliciesFile::load(path)?.into_policies()),
            None => PolicySet::default(),
        };

        let deps = Arc::new(PipelineDeps {
            settings: settings.clone(),
            policies: RwLock::new(policies),
            registry: AdapterRegistry::new(),
            schema_store,
            vector,
            llm,
            sandbox,
            artifacts,
            db_breaker,
            meter,
        });

        let engine = Engine {
            runtime: PipelineRuntime::new(Arc::clone(&deps)),
            deps,
            adapter_factory: self.adapter_factory.unwrap_or_else(|| Arc::new(UnconfiguredAdapterFactory)),
            secret_resolver,
            audit,
            llm_breaker,
            vector_breaker,
        };

        if let Some(path) = &settings.llm_config {
            engine.configure_llm_from_config(path)?;
        }
        if let Some(path) = settings.datasource_config.clone() {
            engine.add_datasource_from_config(&path).await?;
        }
        Ok(engine)
    }
}

/// The natural-language-to-SQL engine.
pub struct Engine {
    deps: Arc<PipelineDeps>,
    runtime: PipelineRuntime,
    adapter_factory: Arc<dyn AdapterFactory>,
    secret_resolver: SecretResolver,
    audit: AuditLog,
    llm_breaker: Arc<CircuitBreaker>,
    vector_breaker: Arc<CircuitBreaker>,
}

impl Engine {
    pub fn builder(settings: Settings) -> EngineBuilder {
        EngineBuilder::new(settings)
    }

    /// Answer one natural-language question. Never raises: failures are
    /// returned inside `errors`.
    pub async fn run_query(&self, request: QueryRequest) -> QueryResult {
        let user_context = request.user_context.unwrap_or_default();
        let state = self
            .runtime
            .run(request.natural_language, request.datasource_id, request.execute, user_context)
            .await;

        let joined: Vec<&str> = state
            .sub_results
            .values()
            .filter_map(SubQueryOutcome::sql)
            .collect();
        let sql = if joined.is_empty() {
            state.sql_draft.clone()
        } else {
            Some(joined.join("\n"))
        };
        let results = state.execution.as_ref().map(|f| f.to_rows()).unwrap_or_default();
        let final_answer = state.final_answer.clone().or_else(|| {
            if state.errors.is_empty() {
                None
            } else {
                Some(String::from("The request could not be completed."))
            }
        });

        QueryResult {
            sql,
            results,
            final_answer,
            errors: state.errors,
            warnings: state.warnings,
            trace_id: state.ctx.trace_id,
            reasoning: state.reasoning,
        }
    }

    // ------------------------------------------------------------------
    // Datasource management
    // ------------------------------------------------------------------

    /// Register a datasource: build its adapter, introspect its schema
    /// through the indexing pool and publish the snapshot.
    pub async fn add_datasource(&self, config: DatasourceConfig) -> Result<String> {
        // The registry keeps the unresolved config so secret references
        // never leak through list_datasources.
        let mut resolved = config.clone();
        for value in resolved.connection.params.values_mut() {
            self.secret_resolver.resolve_json(value)?;
        }
        let adapter = self.adapter_factory.create(&resolved)?;
        self.deps.registry.register(config.clone(), adapter);
        self.refresh_schema(&config.id).await
    }

    /// Load and register every datasource in a config file.
    pub async fn add_datasource_from_config(&self, path: &std::path::Path) -> Result<Vec<String>> {
        let file = DatasourcesFile::load(path)?;
        let mut versions = Vec::with_capacity(file.datasources.len());
        for config in file.datasources {
            versions.push(self.add_datasource(config).await?);
        }
        Ok(versions)
    }

    pub fn list_datasources(&self) -> Vec<DatasourceConfig> {
        self.deps.registry.list()
    }

    /// Re-introspect a datasource schema and republish it. Idempotent:
    /// an unchanged schema keeps its version id.
    pub async fn refresh_schema(&self, datasource_id: &str) -> Result<String> {
        let handle = self.deps.registry.get(datasource_id)?;
        let cancel = CancellationToken::new();
        let envelope = TaskEnvelope {
            mode: TaskMode::FetchSchema,
            datasource_id: datasource_id.to_string(),
            sql: None,
            limits: self.deps.settings.default_limits(),
            deadline: self.deps.settings.global_timeout(),
        };
        let output = self
            .deps
            .sandbox
            .submit(PoolKind::Index, envelope, Arc::clone(&handle.adapter), &cancel)
            .await
            .map_err(|e| EngineError::internal(format!("schema fetch failed: {e}")))?;
        match output {
            TaskOutput::Schema(snapshot) => self.deps.schema_store.register(snapshot),
            _ => Err(EngineError::internal("sandbox returned a mismatched output")),
        }
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// Refresh the schema and rebuild the vector index for one datasource.
    pub async fn index_datasource(&self, datasource_id: &str) -> Result<IndexStats> {
        let version_id = self.refresh_schema(datasource_id).await?;
        let version = self.deps.schema_store.get(datasource_id, Some(&version_id))?;
        let handle = self.deps.registry.get(datasource_id)?;
        self.deps
            .vector
            .index_snapshot(
                &version.snapshot,
                &version.version_id,
                handle.config.description.as_deref(),
                &handle.config.examples,
            )
            .await
            .map_err(EngineError::Pipeline)
    }

    /// Index every registered datasource; per-datasource failures are
    /// reported, not raised.
    pub async fn index_all_datasources(&self) -> BTreeMap<String, std::result::Result<IndexStats, String>> {
        let mut out = BTreeMap::new();
        for id in self.deps.registry.ids() {
            let outcome = self.index_datasource(&id).await.map_err(|e| e.to_string());
            out.insert(id, outcome);
        }
        out
    }

    pub async fn clear_index(&self) -> Result<()> {
        self.deps.vector.clear().await.map_err(EngineError::Pipeline)
    }

    // ------------------------------------------------------------------
    // LLM management
    // ------------------------------------------------------------------

    /// Configure the default agent.
    pub fn configure_llm(&self, config: AgentConfig) -> Result<()> {
        self.configure_llm_named("default", config)
    }

    /// Configure (or replace) a named agent. The api key may be a secret
    /// reference.
    pub fn configure_llm_named(&self, name: &str, mut config: AgentConfig) -> Result<()> {
        if let Some(api_key) = &config.api_key {
            config.api_key = Some(self.secret_resolver.resolve(api_key)?);
        }
        self.deps.llm.configure(name, config)
    }

    pub fn configure_llm_from_config(&self, path: &std::path::Path) -> Result<()> {
        let file = LlmFile::load(path)?;
        self.configure_llm_named("default", file.default)?;
        for (name, config) in file.agents {
            self.configure_llm_named(&name, config)?;
        }
        Ok(())
    }

    /// Secret-stripped config for one agent.
    pub fn get_llm(&self, name: &str) -> Result<AgentConfig> {
        self.deps
            .llm
            .get(name)
            .ok_or_else(|| EngineError::not_found(format!("llm agent '{name}'")))
    }

    pub fn list_llms(&self) -> Vec<(String, AgentConfig)> {
        self.deps.llm.list()
    }

    // ------------------------------------------------------------------
    // Policies and permissions
    // ------------------------------------------------------------------

    pub fn set_policies(&self, policies: Vec<RolePolicy>) {
        *self.deps.policies.write() = PolicySet::new(policies);
    }

    /// Pure RBAC check; never fails and mutates nothing.
    pub fn check_permissions(&self, ctx: &UserContext, datasource_id: &str, table: &str) -> bool {
        self.deps.policies.read().check(ctx, datasource_id, table)
    }

    pub fn get_allowed_resources(&self, ctx: &UserContext) -> AllowedResources {
        self.deps.policies.read().allowed_resources(ctx)
    }

    // ------------------------------------------------------------------
    // Settings and health
    // ------------------------------------------------------------------

    pub fn get_current_settings(&self) -> BTreeMap<String, String> {
        self.deps.settings.as_map()
    }

    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.deps.settings.get(key)
    }

    /// True when the configuration is internally consistent.
    pub fn validate_configuration(&self) -> bool {
        match self.deps.settings.validate() {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "configuration validation failed");
                false
            },
        }
    }

    pub async fn health(&self) -> HealthReport {
        let mut datasources = BTreeMap::new();
        for id in self.deps.registry.ids() {
            let healthy = match self.deps.registry.get(&id) {
                Ok(handle) => handle.adapter.health_check().await.is_ok(),
                Err(_) => false,
            };
            datasources.insert(id, healthy);
        }
        let breakers = BTreeMap::from([
            ("db".to_string(), self.deps.db_breaker.state().await.to_string()),
            ("llm".to_string(), self.llm_breaker.state().await.to_string()),
            ("vector".to_string(), self.vector_breaker.state().await.to_string()),
        ]);
        HealthReport { datasources, breakers, llm_configured: self.deps.llm.is_configured() }
    }

    /// True when the engine can accept queries at all.
    pub fn is_ready(&self) -> bool {
        self.deps.llm.is_configured() && !self.deps.registry.is_empty()
    }

    /// Flush and close the audit sink.
    pub async fn shutdown(self) {
        self.audit.close().await;
    }

    /// Breaker state for a named domain, for diagnostics.
    pub async fn breaker_state(&self, domain: &str) -> Option<BreakerState> {
        match domain {
            "db" => Some(self.deps.db_breaker.state().await),
            "llm" => Some(self.llm_breaker.state().await),
            "vector" => Some(self.vector_breaker.state().await),
            _ => None,
        }
    }
}
