//! Two-layer retrieval over the vector index.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parleql_error::{ErrorCode, PipelineError};

use crate::config::MismatchPolicy;
use crate::resilience::{CallOutcome, CircuitBreaker};
use crate::schema::SchemaStore;

use super::{build_chunks, Chunk, ChunkKind, CuratedExample, ScoredChunk, SearchFilter, VectorError, VectorIndex};

const NODE: &str = "schema_retriever";
const TOP_K: usize = 24;
/// Minimum relaxed-layer hits a datasource needs to survive voting.
const L2_MIN_VOTES: usize = 2;

/// Indexing outcome, per chunk kind.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub datasource_id: String,
    pub schema_version: String,
    pub by_kind: BTreeMap<String, usize>,
    pub total: usize,
}

/// Routing signals retrieved for one datasource.
#[derive(Debug, Clone, Default)]
pub struct DatasourceSignals {
    pub tables: BTreeSet<String>,
    /// Questions of matched curated examples. An example match is a valid
    /// routing signal even when no table matched for the datasource.
    pub examples: Vec<String>,
}

impl DatasourceSignals {
    pub fn has_signal(&self) -> bool {
        !self.tables.is_empty() || !self.examples.is_empty()
    }
}

/// What retrieval produced.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub per_datasource: BTreeMap<String, DatasourceSignals>,
    /// 1 = tight threshold matched; 2 = relaxed layer with voting.
    pub layer: u8,
    pub warnings: Vec<String>,
}

impl RetrievalOutcome {
    pub fn is_empty(&self) -> bool {
        self.per_datasource.is_empty()
    }
}

/// Wrapper over the external vector index.
pub struct VectorGateway {
    index: Arc<dyn VectorIndex>,
    schema_store: Arc<dyn SchemaStore>,
    breaker: Arc<CircuitBreaker>,
    l1_threshold: f32,
    l2_threshold: f32,
    mismatch_policy: MismatchPolicy,
}

impl VectorGateway {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        schema_store: Arc<dyn SchemaStore>,
        breaker: Arc<CircuitBreaker>,
        l1_threshold: f32,
        l2_threshold: f32,
        mismatch_policy: MismatchPolicy,
    ) -> Self {
        Self { index, schema_store, breaker, l1_threshold, l2_threshold, mismatch_policy }
    }

    async fn guarded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, VectorError>>,
    ) -> Result<T, PipelineError> {
        let Some(permit) = self.breaker.try_acquire().await else {
            return Err(PipelineError::new(NODE, ErrorCode::BreakerOpen, "vector breaker is open"));
        };
        match call.await {
            Ok(value) => {
                self.breaker.record(permit, CallOutcome::Success).await;
                Ok(value)
            },
            Err(VectorError::Unavailable { .. }) => {
                self.breaker.record(permit, CallOutcome::Failure).await;
                Err(PipelineError::new(NODE, ErrorCode::VectorUnavailable, "vector index unavailable"))
            },
            Err(VectorError::BadRequest { message }) => {
                self.breaker.record(permit, CallOutcome::Ignored).await;
                Err(PipelineError::new(NODE, ErrorCode::VectorUnavailable, format!("vector request rejected: {message}")))
            },
        }
    }

    /// Index one snapshot version (plus curated examples) into the index.
    pub async fn index_snapshot(
        &self,
        snapshot: &crate::schema::SchemaSnapshot,
        schema_version: &str,
        description: Option<&str>,
        examples: &[CuratedExample],
    ) -> Result<IndexStats, PipelineError> {
        let chunks = build_chunks(snapshot, schema_version, description, examples);
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for chunk in &chunks {
            *by_kind.entry(chunk.kind.as_str().to_string()).or_insert(0) += 1;
        }
        let total = self.guarded(self.index.upsert(chunks)).await?;
        Ok(IndexStats {
            datasource_id: snapshot.datasource_id.clone(),
            schema_version: schema_version.to_string(),
            by_kind,
            total,
        })
    }

    pub async fn clear(&self) -> Result<(), PipelineError> {
        self.guarded(self.index.clear()).await
    }

    /// Two-layer retrieval restricted to `datasource_ids`.
    ///
    /// Layer 1 keeps hits at the tight threshold. When that is empty, the
    /// relaxed layer is consulted and a datasource survives only with
    /// enough votes (or by owning the single best hit).
    pub async fn retrieve(
        &self,
        query: &str,
        datasource_ids: &[String],
    ) -> Result<RetrievalOutcome, PipelineError> {
        let filter = SearchFilter { datasource_ids: datasource_ids.to_vec() };
        let hits = self.guarded(self.index.search(query, &filter, TOP_K)).await?;

        let mut outcome = RetrievalOutcome::default();
        let strong: Vec<&ScoredChunk> =
            hits.iter().filter(|h| h.score >= self.l1_threshold).collect();

        let selected: Vec<&ScoredChunk> = if strong.is_empty() {
            outcome.layer = 2;
            let relaxed: Vec<&ScoredChunk> =
                hits.iter().filter(|h| h.score >= self.l2_threshold).collect();
            let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
            for hit in &relaxed {
                *votes.entry(hit.chunk.datasource_id.as_str()).or_insert(0) += 1;
            }
            let mut qualified: BTreeSet<&str> = votes
                .iter()
                .filter(|(_, &count)| count >= L2_MIN_VOTES)
                .map(|(&ds, _)| ds)
                .collect();
            if qualified.is_empty() {
                if let Some(best) = relaxed.first() {
                    qualified.insert(best.chunk.datasource_id.as_str());
                }
            }
            relaxed
                .into_iter()
                .filter(|h| qualified.contains(h.chunk.datasource_id.as_str()))
                .collect()
        } else {
            outcome.layer = 1;
            strong
        };

        for hit in selected {
            self.check_version(&hit.chunk, &mut outcome.warnings)?;
            let signals = outcome
                .per_datasource
                .entry(hit.chunk.datasource_id.clone())
                .or_default();
            match hit.chunk.kind {
                ChunkKind::Table | ChunkKind::Column => {
                    if let Some(table) = hit.chunk.metadata.get("table") {
                        signals.tables.insert(table.clone());
                    }
                },
                ChunkKind::Example => {
                    if let Some(question) = hit.chunk.metadata.get("question") {
                        signals.examples.push(question.clone());
                    }
                    if let Some(tables) = hit.chunk.metadata.get("tables") {
                        signals.tables.extend(tables.split(',').map(str::trim).map(String::from));
                    }
                },
                ChunkKind::Description => {},
            }
        }

        Ok(outcome)
    }

    fn check_version(&self, chunk: &Chunk, warnings: &mut Vec<String>) -> Result<(), PipelineError> {
        let Some(newest) = self.schema_store.newest_version(&chunk.datasource_id) else {
            return Ok(());
        };
        if chunk.schema_version == newest {
            return Ok(());
        }
        match self.mismatch_policy {
            MismatchPolicy::Ignore => Ok(()),
            MismatchPolicy::Warn => {
                warnings.push(format!(
                    "datasource '{}' index chunk references schema version '{}', newest is '{}'",
                    chunk.datasource_id, chunk.schema_version, newest
                ));
                Ok(())
            },
            MismatchPolicy::Fail => Err(PipelineError::new(
                NODE,
                ErrorCode::SchemaVersionMismatch,
                format!(
                    "index for datasource '{}' is stale (chunk version '{}', newest '{}')",
                    chunk.datasource_id, chunk.schema_version, newest
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EngineType;
    use crate::observability::MemoryMeter;
    use crate::resilience::CircuitBreakerConfig;
    use crate::schema::{ColumnSchema, MemorySchemaStore, SchemaSnapshot, TableSchema};
    use crate::vector::MemoryVectorIndex;

    fn snapshot(ds: &str, table: &str) -> SchemaSnapshot {
        SchemaSnapshot {
            datasource_id: ds.into(),
            engine_type: EngineType::Postgres,
            tables: vec![TableSchema {
                name: table.into(),
                description: None,
                columns: vec![ColumnSchema {
                    name: "id".into(),
                    data_type: "bigint".into(),
                    nullable: false,
                    description: None,
                }],
                foreign_keys: vec![],
            }],
        }
    }

    fn gateway(policy: MismatchPolicy) -> (VectorGateway, Arc<MemorySchemaStore>) {
        let store = Arc::new(MemorySchemaStore::new(5));
        let breaker = Arc::new(CircuitBreaker::new(
            "vector",
            CircuitBreakerConfig::default(),
            Arc::new(MemoryMeter::new()),
        ));
        let gw = VectorGateway::new(
            Arc::new(MemoryVectorIndex::new()),
            store.clone(),
            breaker,
            0.6,
            0.2,
            policy,
        );
        (gw, store)
    }

    #[tokio::test]
    async fn indexing_reports_stats_by_kind() {
        let (gw, store) = gateway(MismatchPolicy::Warn);
        let snap = snapshot("warehouse", "customers");
        let version = store.register(snap.clone()).unwrap();
        let stats = gw.index_snapshot(&snap, &version, Some("main"), &[]).await.unwrap();
        assert_eq!(stats.by_kind["table"], 1);
        assert_eq!(stats.by_kind["column"], 1);
        assert_eq!(stats.by_kind["description"], 1);
        assert_eq!(stats.total, 3);
    }

    #[tokio::test]
    async fn retrieval_returns_table_signals() {
        let (gw, store) = gateway(MismatchPolicy::Warn);
        let snap = snapshot("warehouse", "customers");
        let version = store.register(snap.clone()).unwrap();
        gw.index_snapshot(&snap, &version, None, &[]).await.unwrap();

        let outcome = gw.retrieve("customers", &["warehouse".into()]).await.unwrap();
        assert!(outcome.per_datasource["warehouse"].tables.contains("customers"));
    }

    #[tokio::test]
    async fn example_match_is_a_routing_signal() {
        let (gw, store) = gateway(MismatchPolicy::Warn);
        let snap = snapshot("events", "raw_events");
        let version = store.register(snap.clone()).unwrap();
        let examples = vec![CuratedExample {
            question: "weekly active users trend".into(),
            sql: None,
            tables: vec![],
        }];
        gw.index_snapshot(&snap, &version, None, &examples).await.unwrap();

        let outcome = gw
            .retrieve("weekly active users trend", &["events".into()])
            .await
            .unwrap();
        let signals = &outcome.per_datasource["events"];
        assert!(signals.tables.is_empty());
        assert!(signals.has_signal(), "example alone must be a signal");
    }

    #[tokio::test]
    async fn stale_chunk_fails_in_fail_mode() {
        let (gw, store) = gateway(MismatchPolicy::Fail);
        let snap = snapshot("warehouse", "customers");
        let v1 = store.register(snap.clone()).unwrap();
        gw.index_snapshot(&snap, &v1, None, &[]).await.unwrap();

        // Schema evolves; index still carries v1 chunks.
        let mut evolved = snapshot("warehouse", "customers");
        evolved.tables[0].columns.push(ColumnSchema {
            name: "email".into(),
            data_type: "text".into(),
            nullable: true,
            description: None,
        });
        store.register(evolved).unwrap();

        let err = gw.retrieve("customers", &["warehouse".into()]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaVersionMismatch);
    }
}
