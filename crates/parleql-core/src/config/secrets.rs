//! Secret references in config values.
//!
//! Syntax: `${env:NAME}` or `${provider-id:key}`. Only whole-value
//! references are supported; a value that merely contains `${` is treated
//! as a literal.

use std::collections::BTreeMap;
use std::sync::Arc;

use parleql_error::{EngineError, Result};

use super::files::SecretProviderConfig;

/// One source of secret material.
pub trait SecretProvider: Send + Sync {
    fn id(&self) -> &str;
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads secrets from process environment variables.
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn id(&self) -> &str {
        "env"
    }

    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Reads secrets from a `key=value` lines file loaded at startup.
pub struct FileSecretProvider {
    id: String,
    values: BTreeMap<String, String>,
}

impl FileSecretProvider {
    pub fn load(id: impl Into<String>, path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let values = contents
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                line.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        Ok(Self { id: id.into(), values })
    }
}

impl SecretProvider for FileSecretProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Resolves `${provider:key}` references against registered providers.
pub struct SecretResolver {
    providers: Vec<Arc<dyn SecretProvider>>,
}

impl SecretResolver {
    /// A resolver with only the built-in env provider.
    pub fn with_env() -> Self {
        Self { providers: vec![Arc::new(EnvSecretProvider)] }
    }

    /// Build from a secrets config file (env provider always included).
    pub fn from_configs(configs: &[SecretProviderConfig]) -> Result<Self> {
        let mut resolver = Self::with_env();
        for config in configs {
            match config.kind.as_str() {
                // env is built in; an explicit entry is a no-op.
                "env" => {},
                "file" => {
                    let path = config.path.as_ref().ok_or_else(|| {
                        EngineError::config(format!("secret provider '{}' has no path", config.id))
                    })?;
                    resolver
                        .providers
                        .push(Arc::new(FileSecretProvider::load(config.id.clone(), path)?));
                },
                other => {
                    return Err(EngineError::config(format!(
                        "unknown secret provider kind '{other}' for '{}'",
                        config.id
                    )));
                },
            }
        }
        Ok(resolver)
    }

    fn parse_reference(value: &str) -> Option<(&str, &str)> {
        let inner = value.strip_prefix("${")?.strip_suffix('}')?;
        let (provider, key) = inner.split_once(':')?;
        if provider.is_empty() || key.is_empty() {
            return None;
        }
        Some((provider, key))
    }

    /// Resolve one value. Literals pass through unchanged.
    pub fn resolve(&self, value: &str) -> Result<String> {
        let Some((provider_id, key)) = Self::parse_reference(value) else {
            return Ok(value.to_string());
        };
        let provider = self
            .providers
            .iter()
            .find(|p| p.id() == provider_id)
            .ok_or_else(|| EngineError::config(format!("unknown secret provider '{provider_id}'")))?;
        provider
            .get(key)
            .ok_or_else(|| EngineError::config(format!("secret '{provider_id}:{key}' not found")))
    }

    /// Resolve every string leaf in a JSON value tree, in place.
    pub fn resolve_json(&self, value: &mut serde_json::Value) -> Result<()> {
        match value {
            serde_json::Value::String(s) => {
                *s = self.resolve(s)?;
            },
            serde_json::Value::Array(items) => {
                for item in items {
                    self.resolve_json(item)?;
                }
            },
            serde_json::Value::Object(map) => {
                for (_, item) in map.iter_mut() {
                    self.resolve_json(item)?;
                }
            },
            _ => {},
        }
        Ok(())
    }
}
