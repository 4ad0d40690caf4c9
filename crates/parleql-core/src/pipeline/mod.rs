//! The pipeline: state, stage nodes, the per-sub-query SQL agent and the
//! graph runtime.
//!
//! Data flow: `semantic → intent_validator → schema_retriever → decomposer`
//! as a linear prefix, then one SQL agent per sub-query fanned out by
//! dependency layer, then the deterministic aggregator as the single
//! reduce stage.

pub mod nodes;
pub mod runtime;
pub mod sql_agent;
pub mod state;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::artifact::ArtifactStore;
use crate::config::Settings;
use crate::db::AdapterRegistry;
use crate::llm::LlmGateway;
use crate::observability::Meter;
use crate::resilience::CircuitBreaker;
use crate::sandbox::SandboxManager;
use crate::schema::SchemaStore;
use crate::security::PolicySet;
use crate::vector::VectorGateway;

pub use runtime::PipelineRuntime;
pub use state::{NodeDelta, PipelineState, ReasoningStep, SubQuery, SubQueryOutcome};

/// Shared collaborators every stage can reach.
pub struct PipelineDeps {
    pub settings: Settings,
    pub policies: RwLock<PolicySet>,
    pub registry: AdapterRegistry,
    pub schema_store: Arc<dyn SchemaStore>,
    pub vector: VectorGateway,
    pub llm: LlmGateway,
    pub sandbox: SandboxManager,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub db_breaker: Arc<CircuitBreaker>,
    pub meter: Arc<dyn Meter>,
}
