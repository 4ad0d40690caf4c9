//! The pipeline graph runtime.
//!
//! Builds the stage DAG for one request: a linear ingress prefix, a map
//! stage of SQL agents fanned out per dependency layer, and the aggregator
//! as the single reduce. The global deadline is enforced here regardless
//! of per-node progress; expiry cancels in-flight work and preserves
//! whatever partial state exists.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parleql_error::{ErrorCode, PipelineError, Severity};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::observability::RequestContext;
use crate::resilience::CancellationToken;
use crate::security::UserContext;

use super::nodes::{self, aggregator, decomposer, intent, retriever, semantic};
use super::sql_agent;
use super::state::{NodeDelta, PipelineState, SubQuery};
use super::PipelineDeps;

/// Layer the sub-query DAG for fan-out. Errors on cycles and on edges to
/// unknown ids.
pub(crate) fn topological_layers(sub_queries: &[SubQuery]) -> Result<Vec<Vec<SubQuery>>, String> {
    let ids: BTreeSet<&str> = sub_queries.iter().map(|sq| sq.id.as_str()).collect();
    for sub_query in sub_queries {
        for dep in &sub_query.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(format!("sub-query '{}' depends on unknown id '{dep}'", sub_query.id));
            }
        }
    }

    let mut remaining: BTreeMap<&str, &SubQuery> =
        sub_queries.iter().map(|sq| (sq.id.as_str(), sq)).collect();
    let mut placed: BTreeSet<String> = BTreeSet::new();
    let mut layers: Vec<Vec<SubQuery>> = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, sq)| sq.depends_on.iter().all(|dep| placed.contains(dep)))
            .map(|(&id, _)| id)
            .collect();
        if ready.is_empty() {
            return Err(String::from("sub-query dependencies form a cycle"));
        }
        let mut layer = Vec::with_capacity(ready.len());
        for id in ready {
            let sub_query = remaining.remove(id).expect("present");
            placed.insert(sub_query.id.clone());
            layer.push(sub_query.clone());
        }
        layers.push(layer);
    }
    Ok(layers)
}

/// Short user-facing message for a terminal failure.
fn terminal_answer(errors: &[PipelineError]) -> String {
    let code = errors
        .iter()
        .filter(|e| e.severity == Severity::Fatal)
        .map(|e| e.code)
        .next_back();
    match code {
        Some(ErrorCode::LlmUnavailable) => String::from("Service temporarily unavailable."),
        Some(ErrorCode::IntentRejected) => {
            String::from("This request was declined by the intent policy.")
        },
        Some(ErrorCode::PipelineTimeout) => {
            String::from("The request timed out before it could complete.")
        },
        Some(ErrorCode::SecurityViolation) => {
            String::from("This request references data you are not allowed to access.")
        },
        _ => String::from("The request could not be completed."),
    }
}

/// Runs requests through the graph.
pub struct PipelineRuntime {
    deps: Arc<PipelineDeps>,
}

impl PipelineRuntime {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Execute one request end to end. Never fails: every failure mode is
    /// recorded in the returned state.
    pub async fn run(
        &self,
        user_query: String,
        target_datasource: Option<String>,
        execute: bool,
        user_context: UserContext,
    ) -> PipelineState {
        let trace_id = Uuid::new_v4().to_string();
        let tenant_id = user_context
            .tenant_id
            .clone()
            .unwrap_or_else(|| self.deps.settings.tenant_id.clone());
        let ctx = RequestContext::new(trace_id, tenant_id, &user_context);
        tracing::info!(trace_id = %ctx.trace_id, tenant_id = %ctx.tenant_id, "pipeline request started");

        let mut initial = PipelineState::new(ctx, user_query, user_context, execute);
        initial.target_datasource = target_datasource;
        let state = Arc::new(Mutex::new(initial));
        let cancel = CancellationToken::new();

        let walk = self.walk(Arc::clone(&state), cancel.clone());
        let timed_out = tokio::time::timeout(self.deps.settings.global_timeout(), walk)
            .await
            .is_err();
        // Dropping the walk already killed in-flight stages; cancel tells
        // sandbox workers and gateways owned elsewhere to stop too.
        cancel.cancel();

        let mut state = match Arc::try_unwrap(state) {
            Ok(mutex) => mutex.into_inner(),
            Err(arc) => arc.lock().await.clone(),
        };
        if timed_out {
            state.apply(NodeDelta::from_error(PipelineError::new(
                "runtime",
                ErrorCode::PipelineTimeout,
                format!(
                    "request exceeded the global deadline of {}s",
                    self.deps.settings.global_timeout_sec
                ),
            )));
        }
        if state.final_answer.is_none() && state.has_fatal_error() {
            state.final_answer = Some(terminal_answer(&state.errors));
        }
        tracing::info!(
            trace_id = %state.ctx.trace_id,
            errors = state.errors.len(),
            sub_queries = state.sub_queries.len(),
            "pipeline request finished"
        );
        state
    }

    async fn walk(&self, state: Arc<Mutex<PipelineState>>, cancel: CancellationToken) {
        let deps = &self.deps;

        // Ingress: linear prefix.
        for stage in [Stage::Semantic, Stage::Intent, Stage::Retriever, Stage::Decomposer] {
            if cancel.is_cancelled() {
                return;
            }
            let snapshot = state.lock().await.clone();
            let delta = match stage {
                Stage::Semantic => {
                    nodes::traced_node(
                        semantic::NODE,
                        &snapshot.ctx,
                        &deps.meter,
                        semantic::run(deps, &snapshot, &cancel),
                    )
                    .await
                },
                Stage::Intent => {
                    nodes::traced_node(
                        intent::NODE,
                        &snapshot.ctx,
                        &deps.meter,
                        intent::run(deps, &snapshot, &cancel),
                    )
                    .await
                },
                Stage::Retriever => {
                    nodes::traced_node(
                        retriever::NODE,
                        &snapshot.ctx,
                        &deps.meter,
                        retriever::run(deps, &snapshot, &cancel),
                    )
                    .await
                },
                Stage::Decomposer => {
                    nodes::traced_node(
                        decomposer::NODE,
                        &snapshot.ctx,
                        &deps.meter,
                        decomposer::run(deps, &snapshot, &cancel),
                    )
                    .await
                },
            };
            let failed = !delta.errors.is_empty();
            let fatal = delta.errors.iter().any(PipelineError::is_fatal);
            state.lock().await.apply(delta);
            if fatal {
                return;
            }
            // A non-fatal ingress failure without a product still ends the
            // walk; there is nothing downstream to run on.
            if failed {
                let guard = state.lock().await;
                let starved = match stage {
                    Stage::Semantic | Stage::Intent => false,
                    Stage::Retriever => guard.retrieval.is_none(),
                    Stage::Decomposer => guard.sub_queries.is_empty(),
                };
                if starved {
                    return;
                }
            }
        }

        // Map: one SQL agent per sub-query, fanned out by dependency layer.
        let mut snapshot = state.lock().await.clone();
        if snapshot.sub_queries.is_empty() {
            return;
        }
        let layers = match topological_layers(&snapshot.sub_queries) {
            Ok(layers) => layers,
            Err(message) => {
                state.lock().await.apply(NodeDelta::from_error(PipelineError::new(
                    "runtime",
                    ErrorCode::LogicalValidationFailed,
                    message,
                )));
                return;
            },
        };
        for layer in layers {
            if cancel.is_cancelled() {
                return;
            }
            let mut agents: JoinSet<NodeDelta> = JoinSet::new();
            for sub_query in layer {
                agents.spawn(sql_agent::run_agent(
                    Arc::clone(deps),
                    snapshot.clone(),
                    sub_query,
                    cancel.child_token(),
                ));
            }
            while let Some(joined) = agents.join_next().await {
                let delta = joined.unwrap_or_else(|_| {
                    NodeDelta::from_error(PipelineError::new(
                        sql_agent::SUBGRAPH,
                        ErrorCode::Internal,
                        "agent task aborted",
                    ))
                });
                state.lock().await.apply(delta);
            }
            // Later layers observe earlier results.
            snapshot = state.lock().await.clone();
        }

        // Reduce: the aggregator reads only after every map stage landed.
        if cancel.is_cancelled() {
            return;
        }
        let snapshot = state.lock().await.clone();
        let delta = nodes::traced_node(
            aggregator::NODE,
            &snapshot.ctx,
            &deps.meter,
            aggregator::run(deps, &snapshot),
        )
        .await;
        state.lock().await.apply(delta);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Semantic,
    Intent,
    Retriever,
    Decomposer,
}
