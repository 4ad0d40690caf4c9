//! Versioned persistence for schema snapshots.
//!
//! `register` is the only writer; readers take a shared lock and never
//! block each other. Version ids are `YYYYMMDDhhmmss_<fp8>` so that a
//! directory listing sorts chronologically and the fingerprint prefix makes
//! duplicates visible at a glance.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use parleql_error::{EngineError, Result};
use serde::{Deserialize, Serialize};

use super::snapshot::SchemaSnapshot;

/// One stored version of a datasource schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub version_id: String,
    pub fingerprint: String,
    pub created_at: chrono::DateTime<Utc>,
    pub snapshot: SchemaSnapshot,
}

/// Versioned, fingerprint-deduplicated snapshot storage.
///
/// Implementations keep versions newest-first per datasource and evict
/// beyond `max_versions`, oldest first.
pub trait SchemaStore: Send + Sync {
    /// Persist `snapshot` and return its version id.
    ///
    /// If the fingerprint matches the newest stored version, the existing
    /// version id is returned and nothing is written.
    fn register(&self, snapshot: SchemaSnapshot) -> Result<String>;

    /// Fetch a version (newest when `version_id` is `None`).
    fn get(&self, datasource_id: &str, version_id: Option<&str>) -> Result<SchemaVersion>;

    /// Version ids for a datasource, newest first.
    fn list_versions(&self, datasource_id: &str) -> Vec<String>;

    /// Newest version id for a datasource, if any.
    fn newest_version(&self, datasource_id: &str) -> Option<String> {
        self.list_versions(datasource_id).into_iter().next()
    }
}

fn make_version_id(fingerprint: &str) -> String {
    format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), &fingerprint[..8])
}

fn register_in(versions: &mut Vec<SchemaVersion>, snapshot: SchemaSnapshot, max_versions: usize) -> String {
    let fingerprint = snapshot.fingerprint();
    if let Some(newest) = versions.first() {
        if newest.fingerprint == fingerprint {
            return newest.version_id.clone();
        }
    }
    let version = SchemaVersion {
        version_id: make_version_id(&fingerprint),
        fingerprint,
        created_at: Utc::now(),
        snapshot,
    };
    let id = version.version_id.clone();
    versions.insert(0, version);
    versions.truncate(max_versions.max(1));
    id
}

fn find_in(versions: &[SchemaVersion], datasource_id: &str, version_id: Option<&str>) -> Result<SchemaVersion> {
    match version_id {
        None => versions.first().cloned().ok_or_else(|| {
            EngineError::not_found(format!("schema for datasource '{datasource_id}'"))
        }),
        Some(id) => versions
            .iter()
            .find(|v| v.version_id == id)
            .cloned()
            .ok_or_else(|| {
                EngineError::not_found(format!("schema version '{id}' for datasource '{datasource_id}'"))
            }),
    }
}

/// In-memory store, used in tests and as the default backend.
pub struct MemorySchemaStore {
    max_versions: usize,
    versions: RwLock<HashMap<String, Vec<SchemaVersion>>>,
}

impl MemorySchemaStore {
    pub fn new(max_versions: usize) -> Self {
        Self { max_versions, versions: RwLock::new(HashMap::new()) }
    }
}

impl SchemaStore for MemorySchemaStore {
    fn register(&self, snapshot: SchemaSnapshot) -> Result<String> {
        let mut guard = self.versions.write();
        let versions = guard.entry(snapshot.datasource_id.clone()).or_default();
        Ok(register_in(versions, snapshot, self.max_versions))
    }

    fn get(&self, datasource_id: &str, version_id: Option<&str>) -> Result<SchemaVersion> {
        let guard = self.versions.read();
        let versions = guard.get(datasource_id).map(Vec::as_slice).unwrap_or(&[]);
        find_in(versions, datasource_id, version_id)
    }

    fn list_versions(&self, datasource_id: &str) -> Vec<String> {
        let guard = self.versions.read();
        guard
            .get(datasource_id)
            .map(|v| v.iter().map(|s| s.version_id.clone()).collect())
            .unwrap_or_default()
    }
}

/// File-backed store: one JSON document of versions per datasource.
///
/// Writes go through a temp file + rename so a crash never leaves a
/// half-written document behind.
pub struct FileSchemaStore {
    base: PathBuf,
    max_versions: usize,
    // Serializes register(); reads go straight to disk.
    write_lock: parking_lot::Mutex<()>,
}

impl FileSchemaStore {
    pub fn new(base: impl Into<PathBuf>, max_versions: usize) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base, max_versions, write_lock: parking_lot::Mutex::new(()) })
    }

    fn path_for(&self, datasource_id: &str) -> PathBuf {
        // Datasource ids come from config and are restricted to identifier
        // characters there; sanitize anyway.
        let safe: String = datasource_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.base.join(format!("{safe}.json"))
    }

    fn load(&self, path: &Path) -> Result<Vec<SchemaVersion>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save(&self, path: &Path, versions: &[SchemaVersion]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(versions)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl SchemaStore for FileSchemaStore {
    fn register(&self, snapshot: SchemaSnapshot) -> Result<String> {
        let _guard = self.write_lock.lock();
        let path = self.path_for(&snapshot.datasource_id);
        let mut versions = self.load(&path)?;
        let before = versions.first().map(|v| v.version_id.clone());
        let id = register_in(&mut versions, snapshot, self.max_versions);
        if before.as_deref() != Some(id.as_str()) {
            self.save(&path, &versions)?;
        }
        Ok(id)
    }

    fn get(&self, datasource_id: &str, version_id: Option<&str>) -> Result<SchemaVersion> {
        let versions = self.load(&self.path_for(datasource_id))?;
        find_in(&versions, datasource_id, version_id)
    }

    fn list_versions(&self, datasource_id: &str) -> Vec<String> {
        self.load(&self.path_for(datasource_id))
            .map(|v| v.iter().map(|s| s.version_id.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EngineType;
    use crate::schema::{ColumnSchema, TableSchema};

    fn snapshot(ds: &str, extra_column: bool) -> SchemaSnapshot {
        let mut columns = vec![ColumnSchema {
            name: "id".into(),
            data_type: "bigint".into(),
            nullable: false,
            description: None,
        }];
        if extra_column {
            columns.push(ColumnSchema {
                name: "email".into(),
                data_type: "text".into(),
                nullable: true,
                description: None,
            });
        }
        SchemaSnapshot {
            datasource_id: ds.into(),
            engine_type: EngineType::Postgres,
            tables: vec![TableSchema {
                name: "users".into(),
                description: None,
                columns,
                foreign_keys: vec![],
            }],
        }
    }

    #[test]
    fn reregister_same_schema_returns_same_version() {
        let store = MemorySchemaStore::new(5);
        let v1 = store.register(snapshot("a", false)).unwrap();
        let v2 = store.register(snapshot("a", false)).unwrap();
        assert_eq!(v1, v2);
        assert_eq!(store.list_versions("a").len(), 1);
    }

    #[test]
    fn changed_schema_creates_new_version() {
        let store = MemorySchemaStore::new(5);
        let v1 = store.register(snapshot("a", false)).unwrap();
        let v2 = store.register(snapshot("a", true)).unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.list_versions("a"), vec![v2.clone(), v1]);
        assert_eq!(store.get("a", None).unwrap().version_id, v2);
    }

    #[test]
    fn eviction_drops_oldest() {
        let store = MemorySchemaStore::new(2);
        let _v1 = store.register(snapshot("a", false)).unwrap();
        let v2 = store.register(snapshot("a", true)).unwrap();
        // Third distinct schema.
        let mut third = snapshot("a", true);
        third.tables[0].name = "accounts".into();
        let v3 = store.register(third).unwrap();
        assert_eq!(store.list_versions("a"), vec![v3, v2]);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemorySchemaStore::new(2);
        assert!(store.get("nope", None).is_err());
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSchemaStore::new(dir.path(), 3).unwrap();
        let v1 = store.register(snapshot("warehouse", false)).unwrap();
        let again = store.register(snapshot("warehouse", false)).unwrap();
        assert_eq!(v1, again);
        let loaded = store.get("warehouse", Some(&v1)).unwrap();
        assert_eq!(loaded.snapshot.tables[0].name, "users");
    }
}
