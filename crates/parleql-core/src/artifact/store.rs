//! Content-addressed, tenant-scoped artifact persistence.

use std::path::PathBuf;

use async_trait::async_trait;
use parleql_error::{EngineError, Result};
use serde::{Deserialize, Serialize};

use super::frame::ResultFrame;

/// Default path template, relative to the store base.
pub const DEFAULT_PATH_TEMPLATE: &str =
    "{tenant_id}/{request_id}/{subgraph_name}/{dag_node_id}/{schema_version}/part-00000.json";

/// Addressing metadata for one artifact.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    pub tenant_id: String,
    pub request_id: String,
    pub subgraph_name: String,
    pub dag_node_id: String,
    pub schema_version: String,
}

/// Reference to an immutable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifactRef {
    pub uri: String,
    pub tenant_id: String,
    pub request_id: String,
    pub subgraph_name: String,
    pub dag_node_id: String,
    pub schema_version: String,
}

/// Artifact persistence contract.
///
/// The object behind a returned ref never changes; expiry happens outside
/// the request path.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn create_artifact_ref(&self, meta: ArtifactMeta, frame: &ResultFrame) -> Result<ResultArtifactRef>;
    async fn read(&self, artifact: &ResultArtifactRef) -> Result<ResultFrame>;
}

/// Local-filesystem backend. Object-storage backends implement the same
/// trait outside this crate.
pub struct LocalFsArtifactStore {
    base: PathBuf,
    template: String,
}

fn sanitize(component: &str) -> String {
    let safe: String = component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if safe.is_empty() { "_".into() } else { safe }
}

impl LocalFsArtifactStore {
    pub fn new(base: impl Into<PathBuf>, template: Option<String>) -> Self {
        Self {
            base: base.into(),
            template: template.unwrap_or_else(|| DEFAULT_PATH_TEMPLATE.to_string()),
        }
    }

    fn relative_path(&self, meta: &ArtifactMeta) -> String {
        self.template
            .replace("{tenant_id}", &sanitize(&meta.tenant_id))
            .replace("{request_id}", &sanitize(&meta.request_id))
            .replace("{subgraph_name}", &sanitize(&meta.subgraph_name))
            .replace("{dag_node_id}", &sanitize(&meta.dag_node_id))
            .replace("{schema_version}", &sanitize(&meta.schema_version))
    }
}

#[async_trait]
impl ArtifactStore for LocalFsArtifactStore {
    async fn create_artifact_ref(&self, meta: ArtifactMeta, frame: &ResultFrame) -> Result<ResultArtifactRef> {
        let relative = self.relative_path(&meta);
        let path = self.base.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(EngineError::internal(format!(
                "artifact already exists at '{}'",
                path.display()
            )));
        }
        let bytes = serde_json::to_vec(frame)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        Ok(ResultArtifactRef {
            uri: format!("file://{}", path.display()),
            tenant_id: meta.tenant_id,
            request_id: meta.request_id,
            subgraph_name: meta.subgraph_name,
            dag_node_id: meta.dag_node_id,
            schema_version: meta.schema_version,
        })
    }

    async fn read(&self, artifact: &ResultArtifactRef) -> Result<ResultFrame> {
        let path = artifact
            .uri
            .strip_prefix("file://")
            .ok_or_else(|| EngineError::internal(format!("unsupported artifact uri '{}'", artifact.uri)))?;
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
