//! Deterministic in-process vector index.
//!
//! Scores by token overlap rather than embeddings, which keeps retrieval
//! reproducible in tests and gives deployments a zero-dependency default.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Chunk, ScoredChunk, SearchFilter, VectorError, VectorIndex};

#[derive(Default)]
pub struct MemoryVectorIndex {
    chunks: DashMap<String, Chunk>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(ToString::to_string)
        .collect()
}

fn score(query: &HashSet<String>, text: &str) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let candidate = tokenize(text);
    let overlap = query.intersection(&candidate).count();
    overlap as f32 / query.len() as f32
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize, VectorError> {
        let count = chunks.len();
        for chunk in chunks {
            self.chunks.insert(chunk.stable_id.clone(), chunk);
        }
        Ok(count)
    }

    async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorError> {
        let tokens = tokenize(query);
        let mut hits: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .filter(|entry| {
                filter.datasource_ids.is_empty()
                    || filter.datasource_ids.contains(&entry.value().datasource_id)
            })
            .map(|entry| ScoredChunk {
                score: score(&tokens, &entry.value().text),
                chunk: entry.value().clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        // Deterministic order: score desc, then stable id.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.stable_id.cmp(&b.chunk.stable_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn clear(&self) -> Result<(), VectorError> {
        self.chunks.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, VectorError> {
        Ok(self.chunks.len())
    }
}
