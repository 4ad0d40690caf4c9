//! Engine types, capability flags and adapter value types.

use serde::{Deserialize, Serialize};

/// Database engine families the generator knows dialect rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Postgres,
    Mysql,
    Sqlite,
    Sqlserver,
}

impl EngineType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Sqlserver => "sqlserver",
        }
    }

    /// Parse a `connection.type` value from datasource config.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::Mysql),
            "sqlite" => Some(Self::Sqlite),
            "sqlserver" | "mssql" => Some(Self::Sqlserver),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags queried by the SQL generator and the validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub dialect: EngineType,
    pub supports_cte: bool,
    pub supports_window_functions: bool,
    /// `LIMIT n OFFSET m` pagination; `false` means `TOP n` style.
    pub supports_limit_offset: bool,
    pub supports_dry_run: bool,
    pub supports_cost_estimate: bool,
    pub supports_introspection: bool,
}

impl AdapterCapabilities {
    /// Conservative defaults per engine family.
    pub fn defaults_for(dialect: EngineType) -> Self {
        match dialect {
            EngineType::Postgres => Self {
                dialect,
                supports_cte: true,
                supports_window_functions: true,
                supports_limit_offset: true,
                supports_dry_run: true,
                supports_cost_estimate: true,
                supports_introspection: true,
            },
            EngineType::Mysql => Self {
                dialect,
                supports_cte: true,
                supports_window_functions: true,
                supports_limit_offset: true,
                supports_dry_run: false,
                supports_cost_estimate: false,
                supports_introspection: true,
            },
            EngineType::Sqlite => Self {
                dialect,
                supports_cte: true,
                supports_window_functions: true,
                supports_limit_offset: true,
                supports_dry_run: false,
                supports_cost_estimate: false,
                supports_introspection: true,
            },
            EngineType::Sqlserver => Self {
                dialect,
                supports_cte: true,
                supports_window_functions: true,
                supports_limit_offset: false,
                supports_dry_run: false,
                supports_cost_estimate: false,
                supports_introspection: true,
            },
        }
    }
}

/// Row-major result set returned by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a dry run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DryRunReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Safety limits applied to one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecLimits {
    pub max_rows: u64,
    pub max_bytes: u64,
    pub statement_timeout_ms: u64,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self { max_rows: 1_000, max_bytes: 16 * 1024 * 1024, statement_timeout_ms: 30_000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_type_parses_aliases() {
        assert_eq!(EngineType::parse("postgresql"), Some(EngineType::Postgres));
        assert_eq!(EngineType::parse("MSSQL"), Some(EngineType::Sqlserver));
        assert_eq!(EngineType::parse("oracle"), None);
    }

    #[test]
    fn sqlserver_uses_top_pagination() {
        let caps = AdapterCapabilities::defaults_for(EngineType::Sqlserver);
        assert!(!caps.supports_limit_offset);
        let caps = AdapterCapabilities::defaults_for(EngineType::Postgres);
        assert!(caps.supports_limit_offset);
    }
}
