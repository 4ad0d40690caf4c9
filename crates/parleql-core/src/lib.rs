//! # ParleQL Core
//!
//! Core execution engine for ParleQL: a natural-language-to-SQL pipeline.
//!
//! ## Architecture
//!
//! A request walks a directed graph of stages:
//!
//! ```text
//! Question + UserContext
//!         ↓
//!     Semantic  →  IntentValidator  →  SchemaRetriever  →  Decomposer
//!         ↓                                                    ↓
//!         └──────────────── fan-out per SubQuery ──────────────┘
//!                                 ↓
//!      SQL Agent (Plan → Validate → Generate → DryRun → Execute)
//!                    ↑______________Refine_______________|
//!                                 ↓
//!                            Aggregator (deterministic, no LLM)
//!                                 ↓
//!                            QueryResult
//! ```
//!
//! ### Key components
//!
//! - **Schema**: versioned authoritative snapshots with deterministic fingerprints
//! - **Vector**: chunk building and two-layer retrieval over an external index
//! - **Db**: datasource adapter contract and registry with capability flags
//! - **Sandbox**: two crash-isolated worker pools (execute / index)
//! - **Artifact**: immutable columnar result frames addressed per request
//! - **Llm**: named agent configurations behind a circuit breaker
//! - **Pipeline**: state, stage nodes, SQL agent loop, graph runtime
//! - **Security**: role-based access decisions as pure functions
//! - **Observability**: trace context, meters, append-only audit log

#![forbid(unsafe_code)]
// Missing docs allowed for internal items - public API is documented where it matters
#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

pub mod artifact;
pub mod config;
pub mod db;
pub mod engine;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod plan;
pub mod resilience;
pub mod sandbox;
pub mod schema;
pub mod security;
pub mod sqlgen;
pub mod vector;

pub use engine::{Engine, EngineBuilder, QueryRequest, QueryResult};
pub use parleql_error::{EngineError, ErrorCode, PipelineError, Result, Severity};
