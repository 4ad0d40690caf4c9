//! The datasource adapter contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::SchemaSnapshot;

use super::types::{AdapterCapabilities, DryRunReport, ExecLimits, QueryRows};

/// Errors surfaced by adapters.
///
/// The classification matters for the DB circuit breaker: `Unavailable`
/// and `Timeout` count as failures; `Query` and `Unsupported` are the
/// caller's problem and are ignored by the breaker.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("datasource unavailable: {message}")]
    Unavailable { message: String },

    #[error("query failed: {message}")]
    Query {
        message: String,
        sql_state: Option<String>,
    },

    #[error("statement timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },
}

impl AdapterError {
    /// Whether the breaker should count this as a downstream failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Builds adapter handles from datasource configs; injected by the
/// embedder, since concrete drivers live outside this crate.
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        config: &crate::config::DatasourceConfig,
    ) -> parleql_error::Result<std::sync::Arc<dyn DatasourceAdapter>>;
}

/// Pluggable component that speaks to one datasource engine.
///
/// All methods are cancellation-safe: the sandbox may drop the returned
/// future at any time to enforce a deadline, and implementations must not
/// leave shared state corrupted when that happens.
#[async_trait]
pub trait DatasourceAdapter: Send + Sync {
    /// Id of the datasource this adapter serves.
    fn datasource_id(&self) -> &str;

    /// Dialect and feature flags for SQL generation.
    fn capabilities(&self) -> AdapterCapabilities;

    /// Introspect the structural schema.
    async fn fetch_schema(&self) -> Result<SchemaSnapshot, AdapterError>;

    /// Execute `sql` under `limits` and return row-major results.
    async fn execute(&self, sql: &str, limits: &ExecLimits) -> Result<QueryRows, AdapterError>;

    /// Validate `sql` without executing it.
    ///
    /// Engines without native dry-run support return
    /// `AdapterError::Unsupported`; the physical validator then degrades to
    /// cost estimation or passes the statement through.
    async fn dry_run(&self, sql: &str) -> Result<DryRunReport, AdapterError>;

    /// Estimated cost of `sql` in engine-specific units.
    async fn cost_estimate(&self, sql: &str) -> Result<f64, AdapterError>;

    /// Verify connectivity.
    async fn health_check(&self) -> Result<(), AdapterError>;
}
