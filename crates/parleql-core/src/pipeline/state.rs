//! Pipeline state and the node delta discipline.
//!
//! Nodes never mutate state directly: each returns a [`NodeDelta`] and the
//! runtime merges it. `errors`, `warnings` and `reasoning` are append-only;
//! single-assignment fields refuse a second write, which is what freezes
//! `sub_queries` after decomposition.

use std::collections::BTreeMap;

use parleql_error::{PipelineError, Severity};
use serde::{Deserialize, Serialize};

use crate::artifact::{ResultArtifactRef, ResultFrame};
use crate::observability::RequestContext;
use crate::plan::ResultPlan;
use crate::security::UserContext;
use crate::vector::RetrievalOutcome;

/// An atomic, single-datasource question produced by decomposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuery {
    pub id: String,
    pub text: String,
    pub datasource_id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Terminal state of one sub-query.
#[derive(Debug, Clone, PartialEq)]
pub enum SubQueryOutcome {
    /// Executed; results live in the artifact store.
    Completed { artifact: ResultArtifactRef, sql: String },
    /// DB breaker open: the SQL that would have run.
    Degraded { sql: String },
    /// Execution disabled for the request; SQL generated only.
    SkippedExecution { sql: String },
    /// Exhausted or fatal.
    Failed,
}

impl SubQueryOutcome {
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Completed { sql, .. } | Self::Degraded { sql } | Self::SkippedExecution { sql } => {
                Some(sql)
            },
            Self::Failed => None,
        }
    }
}

/// One structured reasoning event, surfaced in the query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub node: String,
    pub summary: String,
    pub elapsed_ms: u64,
}

/// Per-request state carried through the graph.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub ctx: RequestContext,
    pub user_query: String,
    pub user_context: UserContext,
    pub execute: bool,
    /// Caller-pinned datasource; skips routing when set.
    pub target_datasource: Option<String>,

    pub normalized_query: Option<String>,
    pub entities: Vec<String>,
    pub hints: Vec<String>,
    pub retrieval: Option<RetrievalOutcome>,
    pub sub_queries: Vec<SubQuery>,
    pub result_plan: Option<ResultPlan>,
    pub sub_results: BTreeMap<String, SubQueryOutcome>,
    pub sql_draft: Option<String>,
    pub execution: Option<ResultFrame>,
    pub final_answer: Option<String>,

    pub errors: Vec<PipelineError>,
    pub warnings: Vec<String>,
    pub reasoning: Vec<ReasoningStep>,
    pub retry_count: BTreeMap<String, u32>,
}

impl PipelineState {
    pub fn new(ctx: RequestContext, user_query: String, user_context: UserContext, execute: bool) -> Self {
        Self {
            ctx,
            user_query,
            user_context,
            execute,
            target_datasource: None,
            normalized_query: None,
            entities: Vec::new(),
            hints: Vec::new(),
            retrieval: None,
            sub_queries: Vec::new(),
            result_plan: None,
            sub_results: BTreeMap::new(),
            sql_draft: None,
            execution: None,
            final_answer: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            reasoning: Vec::new(),
            retry_count: BTreeMap::new(),
        }
    }

    /// The question as later stages should see it.
    pub fn effective_query(&self) -> &str {
        self.normalized_query.as_deref().unwrap_or(&self.user_query)
    }

    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Fatal)
    }

    /// Merge one node's delta. Append-only lists extend; single-assignment
    /// fields only accept their first write.
    pub fn apply(&mut self, delta: NodeDelta) {
        if self.normalized_query.is_none() {
            self.normalized_query = delta.normalized_query;
        }
        self.entities.extend(delta.entities);
        self.hints.extend(delta.hints);
        if self.retrieval.is_none() {
            self.retrieval = delta.retrieval;
        }
        if self.sub_queries.is_empty() {
            if let Some(sub_queries) = delta.sub_queries {
                self.sub_queries = sub_queries;
            }
        }
        if self.result_plan.is_none() {
            self.result_plan = delta.result_plan;
        }
        for (id, outcome) in delta.sub_results {
            self.sub_results.entry(id).or_insert(outcome);
        }
        if delta.sql_draft.is_some() {
            self.sql_draft = delta.sql_draft;
        }
        if self.execution.is_none() {
            self.execution = delta.execution;
        }
        if self.final_answer.is_none() {
            self.final_answer = delta.final_answer;
        }
        self.errors.extend(delta.errors);
        self.warnings.extend(delta.warnings);
        self.reasoning.extend(delta.reasoning);
        for (node, count) in delta.retry_counts {
            *self.retry_count.entry(node).or_insert(0) += count;
        }
    }
}

/// What one node produced.
#[derive(Debug, Default)]
pub struct NodeDelta {
    pub normalized_query: Option<String>,
    pub entities: Vec<String>,
    pub hints: Vec<String>,
    pub retrieval: Option<RetrievalOutcome>,
    pub sub_queries: Option<Vec<SubQuery>>,
    pub result_plan: Option<ResultPlan>,
    pub sub_results: Vec<(String, SubQueryOutcome)>,
    pub sql_draft: Option<String>,
    pub execution: Option<ResultFrame>,
    pub final_answer: Option<String>,
    pub errors: Vec<PipelineError>,
    pub warnings: Vec<String>,
    pub reasoning: Vec<ReasoningStep>,
    pub retry_counts: Vec<(String, u32)>,
}

impl NodeDelta {
    pub fn from_error(error: PipelineError) -> Self {
        Self { errors: vec![error], ..Default::default() }
    }

    pub fn with_reasoning(mut self, node: &str, summary: impl Into<String>, elapsed_ms: u64) -> Self {
        self.reasoning.push(ReasoningStep { node: node.to_string(), summary: summary.into(), elapsed_ms });
        self
    }
}
