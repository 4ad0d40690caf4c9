//! Config file formats (TOML on disk).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parleql_error::{EngineError, Result};
use serde::{Deserialize, Serialize};

use crate::llm::AgentConfig;
use crate::security::RolePolicy;
use crate::vector::CuratedExample;

/// Connection block of a datasource: engine type plus driver parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Driver parameters (host, port, dsn, credentials...). Secret
    /// references are resolved at load time.
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

/// One configured datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub connection: ConnectionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    /// Curated NL examples indexed alongside the schema.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<CuratedExample>,
}

/// `datasources.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourcesFile {
    pub version: u32,
    #[serde(default)]
    pub datasources: Vec<DatasourceConfig>,
}

/// `llm.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmFile {
    pub version: u32,
    pub default: AgentConfig,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

/// `policies.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesFile {
    pub version: u32,
    #[serde(default)]
    pub roles: BTreeMap<String, RolePolicy>,
}

/// One provider entry in `secrets.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretProviderConfig {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `secrets.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsFile {
    pub version: u32,
    #[serde(default)]
    pub providers: Vec<SecretProviderConfig>,
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigFile {
        message: format!("cannot read {what} config '{}': {e}", path.display()),
    })?;
    toml::from_str(&contents).map_err(|e| EngineError::ConfigFile {
        message: format!("invalid {what} config '{}': {e}", path.display()),
    })
}

impl DatasourcesFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file: Self = load_toml(path, "datasource")?;
        for ds in &file.datasources {
            if ds.id.is_empty() {
                return Err(EngineError::config("datasource with empty id"));
            }
        }
        Ok(file)
    }
}

impl LlmFile {
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path, "llm")
    }
}

impl PoliciesFile {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file: Self = load_toml(path, "policies")?;
        // The map key is authoritative for the role name.
        for (name, policy) in &mut file.roles {
            if policy.role.is_empty() {
                policy.role = name.clone();
            }
        }
        Ok(file)
    }

    pub fn into_policies(self) -> Vec<RolePolicy> {
        self.roles.into_values().collect()
    }
}

impl SecretsFile {
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path, "secrets")
    }
}
