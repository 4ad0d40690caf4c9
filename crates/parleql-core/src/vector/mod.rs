//! Vector index gateway: chunk building and two-layer retrieval.
//!
//! The index only ever stores and returns *candidates*; authoritative
//! schema is always resolved from the schema store afterwards.

mod chunks;
mod gateway;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use chunks::{build_chunks, Chunk, ChunkKind, CuratedExample};
pub use gateway::{DatasourceSignals, IndexStats, RetrievalOutcome, VectorGateway};
pub use memory::MemoryVectorIndex;

/// Errors from the external vector index.
#[derive(Debug, Clone, Error)]
pub enum VectorError {
    /// Transient or infrastructure failure; counted by the breaker.
    #[error("vector index unavailable: {message}")]
    Unavailable { message: String },

    /// Caller mistake; ignored by the breaker.
    #[error("bad vector request: {message}")]
    BadRequest { message: String },
}

/// A retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Restricts a search to a set of datasources.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Empty means no restriction.
    pub datasource_ids: Vec<String>,
}

/// External vector index contract.
///
/// `upsert` is keyed by `Chunk::stable_id`, so re-indexing the same
/// snapshot is idempotent.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize, VectorError>;
    async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorError>;
    async fn clear(&self) -> Result<(), VectorError>;
    async fn count(&self) -> Result<usize, VectorError>;
}
