//! Process-wide adapter lookup.

use std::sync::Arc;

use dashmap::DashMap;
use parleql_error::{EngineError, Result};

use crate::config::DatasourceConfig;

use super::traits::DatasourceAdapter;

/// A registered datasource: its config plus the live adapter.
#[derive(Clone)]
pub struct AdapterHandle {
    pub config: DatasourceConfig,
    pub adapter: Arc<dyn DatasourceAdapter>,
}

/// Registry of datasource adapters, keyed by datasource id.
///
/// Hot-add is allowed at any time; `register` on an existing id replaces
/// the handle. Schema refresh lives on the engine because it needs the
/// sandbox and the schema store.
#[derive(Default)]
pub struct AdapterRegistry {
    handles: DashMap<String, AdapterHandle>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: DatasourceConfig, adapter: Arc<dyn DatasourceAdapter>) {
        self.handles.insert(config.id.clone(), AdapterHandle { config, adapter });
    }

    pub fn get(&self, datasource_id: &str) -> Result<AdapterHandle> {
        self.handles
            .get(datasource_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::not_found(format!("datasource '{datasource_id}'")))
    }

    pub fn contains(&self, datasource_id: &str) -> bool {
        self.handles.contains_key(datasource_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn list(&self) -> Vec<DatasourceConfig> {
        let mut configs: Vec<DatasourceConfig> =
            self.handles.iter().map(|e| e.value().config.clone()).collect();
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        configs
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
