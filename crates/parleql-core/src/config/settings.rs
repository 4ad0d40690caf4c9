//! Engine settings, sourced from the environment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use parleql_error::{EngineError, Result};
use serde::{Deserialize, Serialize};

use crate::db::ExecLimits;
use crate::resilience::RetryPolicy;

/// Behaviour when a retrieved chunk references a stale schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    Warn,
    Fail,
    Ignore,
}

impl MismatchPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "warn" => Some(Self::Warn),
            "fail" => Some(Self::Fail),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Ignore => "ignore",
        }
    }
}

/// Telemetry exporter selection (wired by the server binary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    None,
    Console,
    Otlp,
}

impl ExporterKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "console" => Some(Self::Console),
            "otlp" => Some(Self::Otlp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Console => "console",
            Self::Otlp => "otlp",
        }
    }
}

/// All engine settings. `from_env` applies the documented defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    // Config file paths.
    pub llm_config: Option<PathBuf>,
    pub datasource_config: Option<PathBuf>,
    pub policies_config: Option<PathBuf>,
    pub secrets_config: Option<PathBuf>,
    pub vector_store: Option<String>,

    // Storage.
    pub schema_store_backend: String,
    pub schema_store_path: PathBuf,
    pub schema_store_max_versions: usize,
    pub result_artifact_backend: String,
    pub result_artifact_base_uri: String,
    pub result_artifact_path_template: Option<String>,

    // Execution.
    pub global_timeout_sec: u64,
    pub sandbox_exec_workers: usize,
    pub sandbox_index_workers: usize,

    // Behaviour.
    pub schema_version_mismatch_policy: MismatchPolicy,
    pub sql_agent_max_retries: u32,
    pub sql_agent_retry_base_delay_sec: f64,
    pub sql_agent_retry_max_delay_sec: f64,
    pub sql_agent_retry_jitter_delay_sec: f64,
    pub logical_validator_strict_columns: bool,
    pub tenant_id: String,

    // Limits.
    pub default_row_limit: u64,
    pub default_max_bytes: u64,
    pub default_statement_timeout_ms: u64,

    // Routing thresholds.
    pub router_l1_threshold: f32,
    pub router_l2_threshold: f32,

    // Observability.
    pub observability_exporter: ExporterKind,
    pub otlp_endpoint: Option<String>,
    pub audit_log_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_config: None,
            datasource_config: None,
            policies_config: None,
            secrets_config: None,
            vector_store: None,
            schema_store_backend: "memory".into(),
            schema_store_path: PathBuf::from("./data/schema_store"),
            schema_store_max_versions: 10,
            result_artifact_backend: "local".into(),
            result_artifact_base_uri: "./data/artifacts".into(),
            result_artifact_path_template: None,
            global_timeout_sec: 120,
            sandbox_exec_workers: 4,
            sandbox_index_workers: 2,
            schema_version_mismatch_policy: MismatchPolicy::Warn,
            sql_agent_max_retries: 3,
            sql_agent_retry_base_delay_sec: 0.2,
            sql_agent_retry_max_delay_sec: 5.0,
            sql_agent_retry_jitter_delay_sec: 0.1,
            logical_validator_strict_columns: true,
            tenant_id: "default".into(),
            default_row_limit: 1_000,
            default_max_bytes: 16 * 1024 * 1024,
            default_statement_timeout_ms: 30_000,
            router_l1_threshold: 0.6,
            router_l2_threshold: 0.25,
            observability_exporter: ExporterKind::None,
            otlp_endpoint: None,
            audit_log_path: None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Settings {
    /// Read every setting from the environment, with defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            llm_config: env_var("LLM_CONFIG").map(PathBuf::from),
            datasource_config: env_var("DATASOURCE_CONFIG").map(PathBuf::from),
            policies_config: env_var("POLICIES_CONFIG").map(PathBuf::from),
            secrets_config: env_var("SECRETS_CONFIG").map(PathBuf::from),
            vector_store: env_var("VECTOR_STORE"),
            schema_store_backend: env_var("SCHEMA_STORE_BACKEND").unwrap_or(default.schema_store_backend),
            schema_store_path: env_var("SCHEMA_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.schema_store_path),
            schema_store_max_versions: env_parse("SCHEMA_STORE_MAX_VERSIONS", default.schema_store_max_versions),
            result_artifact_backend: env_var("RESULT_ARTIFACT_BACKEND").unwrap_or(default.result_artifact_backend),
            result_artifact_base_uri: env_var("RESULT_ARTIFACT_BASE_URI").unwrap_or(default.result_artifact_base_uri),
            result_artifact_path_template: env_var("RESULT_ARTIFACT_PATH_TEMPLATE"),
            global_timeout_sec: env_parse("GLOBAL_TIMEOUT_SEC", default.global_timeout_sec),
            sandbox_exec_workers: env_parse("SANDBOX_EXEC_WORKERS", default.sandbox_exec_workers),
            sandbox_index_workers: env_parse("SANDBOX_INDEX_WORKERS", default.sandbox_index_workers),
            schema_version_mismatch_policy: env_var("SCHEMA_VERSION_MISMATCH_POLICY")
                .and_then(|v| MismatchPolicy::parse(&v))
                .unwrap_or(default.schema_version_mismatch_policy),
            sql_agent_max_retries: env_parse("SQL_AGENT_MAX_RETRIES", default.sql_agent_max_retries),
            sql_agent_retry_base_delay_sec: env_parse(
                "SQL_AGENT_RETRY_BASE_DELAY_SEC",
                default.sql_agent_retry_base_delay_sec,
            ),
            sql_agent_retry_max_delay_sec: env_parse(
                "SQL_AGENT_RETRY_MAX_DELAY_SEC",
                default.sql_agent_retry_max_delay_sec,
            ),
            sql_agent_retry_jitter_delay_sec: env_parse(
                "SQL_AGENT_RETRY_JITTER_DELAY_SEC",
                default.sql_agent_retry_jitter_delay_sec,
            ),
            logical_validator_strict_columns: env_parse(
                "LOGICAL_VALIDATOR_STRICT_COLUMNS",
                default.logical_validator_strict_columns,
            ),
            tenant_id: env_var("TENANT_ID").unwrap_or(default.tenant_id),
            default_row_limit: env_parse("DEFAULT_ROW_LIMIT", default.default_row_limit),
            default_max_bytes: env_parse("DEFAULT_MAX_BYTES", default.default_max_bytes),
            default_statement_timeout_ms: env_parse(
                "DEFAULT_STATEMENT_TIMEOUT_MS",
                default.default_statement_timeout_ms,
            ),
            router_l1_threshold: env_parse("ROUTER_L1_THRESHOLD", default.router_l1_threshold),
            router_l2_threshold: env_parse("ROUTER_L2_THRESHOLD", default.router_l2_threshold),
            observability_exporter: env_var("OBSERVABILITY_EXPORTER")
                .and_then(|v| ExporterKind::parse(&v))
                .unwrap_or(default.observability_exporter),
            otlp_endpoint: env_var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            audit_log_path: env_var("AUDIT_LOG_PATH").map(PathBuf::from),
        }
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Result<()> {
        if self.router_l1_threshold < self.router_l2_threshold {
            return Err(EngineError::config(
                "ROUTER_L1_THRESHOLD must be >= ROUTER_L2_THRESHOLD",
            ));
        }
        if self.sandbox_exec_workers == 0 || self.sandbox_index_workers == 0 {
            return Err(EngineError::config("sandbox worker counts must be >= 1"));
        }
        if self.global_timeout_sec == 0 {
            return Err(EngineError::config("GLOBAL_TIMEOUT_SEC must be > 0"));
        }
        if self.sql_agent_retry_base_delay_sec > self.sql_agent_retry_max_delay_sec {
            return Err(EngineError::config(
                "SQL_AGENT_RETRY_BASE_DELAY_SEC must be <= SQL_AGENT_RETRY_MAX_DELAY_SEC",
            ));
        }
        match self.schema_store_backend.as_str() {
            "memory" | "file" => {},
            other => {
                return Err(EngineError::config(format!("unknown schema store backend '{other}'")));
            },
        }
        match self.result_artifact_backend.as_str() {
            "local" => {},
            other => {
                return Err(EngineError::config(format!("unknown artifact backend '{other}'")));
            },
        }
        for path in [&self.llm_config, &self.datasource_config, &self.policies_config, &self.secrets_config]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                return Err(EngineError::config(format!(
                    "configured file '{}' does not exist",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sql_agent_max_retries,
            base_delay: Duration::from_secs_f64(self.sql_agent_retry_base_delay_sec.max(0.0)),
            max_delay: Duration::from_secs_f64(self.sql_agent_retry_max_delay_sec.max(0.0)),
            jitter: Duration::from_secs_f64(self.sql_agent_retry_jitter_delay_sec.max(0.0)),
        }
    }

    pub fn default_limits(&self) -> ExecLimits {
        ExecLimits {
            max_rows: self.default_row_limit,
            max_bytes: self.default_max_bytes,
            statement_timeout_ms: self.default_statement_timeout_ms,
        }
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_timeout_sec)
    }

    /// Settings as a flat map, for `get_current_settings`. Secret-free by
    /// construction: settings never hold secret values, only paths.
    pub fn as_map(&self) -> BTreeMap<String, String> {
        let display = |p: &Option<PathBuf>| {
            p.as_ref().map(|v| v.display().to_string()).unwrap_or_default()
        };
        BTreeMap::from([
            ("llm_config".into(), display(&self.llm_config)),
            ("datasource_config".into(), display(&self.datasource_config)),
            ("policies_config".into(), display(&self.policies_config)),
            ("secrets_config".into(), display(&self.secrets_config)),
            ("vector_store".into(), self.vector_store.clone().unwrap_or_default()),
            ("schema_store_backend".into(), self.schema_store_backend.clone()),
            ("schema_store_path".into(), self.schema_store_path.display().to_string()),
            ("schema_store_max_versions".into(), self.schema_store_max_versions.to_string()),
            ("result_artifact_backend".into(), self.result_artifact_backend.clone()),
            ("result_artifact_base_uri".into(), self.result_artifact_base_uri.clone()),
            (
                "result_artifact_path_template".into(),
                self.result_artifact_path_template.clone().unwrap_or_default(),
            ),
            ("global_timeout_sec".into(), self.global_timeout_sec.to_string()),
            ("sandbox_exec_workers".into(), self.sandbox_exec_workers.to_string()),
            ("sandbox_index_workers".into(), self.sandbox_index_workers.to_string()),
            (
                "schema_version_mismatch_policy".into(),
                self.schema_version_mismatch_policy.as_str().into(),
            ),
            ("sql_agent_max_retries".into(), self.sql_agent_max_retries.to_string()),
            (
                "sql_agent_retry_base_delay_sec".into(),
                self.sql_agent_retry_base_delay_sec.to_string(),
            ),
            (
                "sql_agent_retry_max_delay_sec".into(),
                self.sql_agent_retry_max_delay_sec.to_string(),
            ),
            (
                "sql_agent_retry_jitter_delay_sec".into(),
                self.sql_agent_retry_jitter_delay_sec.to_string(),
            ),
            (
                "logical_validator_strict_columns".into(),
                self.logical_validator_strict_columns.to_string(),
            ),
            ("tenant_id".into(), self.tenant_id.clone()),
            ("default_row_limit".into(), self.default_row_limit.to_string()),
            ("default_max_bytes".into(), self.default_max_bytes.to_string()),
            (
                "default_statement_timeout_ms".into(),
                self.default_statement_timeout_ms.to_string(),
            ),
            ("router_l1_threshold".into(), self.router_l1_threshold.to_string()),
            ("router_l2_threshold".into(), self.router_l2_threshold.to_string()),
            ("observability_exporter".into(), self.observability_exporter.as_str().into()),
            ("otlp_endpoint".into(), self.otlp_endpoint.clone().unwrap_or_default()),
            ("audit_log_path".into(), display(&self.audit_log_path)),
        ])
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.as_map().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn threshold_inversion_is_rejected() {
        let settings = Settings {
            router_l1_threshold: 0.1,
            router_l2_threshold: 0.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_workers_are_rejected() {
        let settings = Settings { sandbox_exec_workers: 0, ..Default::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_map_exposes_every_documented_key() {
        let map = Settings::default().as_map();
        for key in [
            "global_timeout_sec",
            "sql_agent_max_retries",
            "schema_version_mismatch_policy",
            "router_l1_threshold",
            "default_row_limit",
            "tenant_id",
        ] {
            assert!(map.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn retry_policy_reflects_settings() {
        let settings = Settings {
            sql_agent_max_retries: 7,
            sql_agent_retry_base_delay_sec: 0.5,
            ..Default::default()
        };
        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
