//! Schema retrieval: candidate tables from the vector index, authoritative
//! schema from the schema store.

use std::collections::BTreeSet;

use parleql_error::{ErrorCode, PipelineError, Severity};

use crate::pipeline::state::{NodeDelta, PipelineState};
use crate::pipeline::PipelineDeps;
use crate::resilience::CancellationToken;
use crate::vector::{DatasourceSignals, RetrievalOutcome};

pub const NODE: &str = "schema_retriever";

/// Datasources the requesting user may touch at all.
pub fn accessible_datasources(deps: &PipelineDeps, state: &PipelineState) -> Vec<String> {
    let policies = deps.policies.read();
    deps.registry
        .ids()
        .into_iter()
        .filter(|ds| policies.datasource_allowed(&state.user_context, ds))
        .collect()
}

/// Retrieval-free fallback: every table of every accessible datasource
/// with a registered snapshot.
fn full_snapshot_signals(deps: &PipelineDeps, datasources: &[String]) -> RetrievalOutcome {
    let mut outcome = RetrievalOutcome::default();
    for ds in datasources {
        if let Ok(version) = deps.schema_store.get(ds, None) {
            let signals = DatasourceSignals {
                tables: version.snapshot.table_names().into_iter().collect::<BTreeSet<_>>(),
                examples: Vec::new(),
            };
            if signals.has_signal() {
                outcome.per_datasource.insert(ds.clone(), signals);
            }
        }
    }
    outcome
}

pub async fn run(
    deps: &PipelineDeps,
    state: &PipelineState,
    _cancel: &CancellationToken,
) -> Result<NodeDelta, PipelineError> {
    let datasources = accessible_datasources(deps, state);
    if datasources.is_empty() {
        return Err(PipelineError::new(
            NODE,
            ErrorCode::SecurityViolation,
            "no datasource is accessible to this user",
        ));
    }

    let mut delta = NodeDelta::default();
    let outcome = match deps.vector.retrieve(state.effective_query(), &datasources).await {
        Ok(outcome) if !outcome.is_empty() => {
            delta.warnings.extend(outcome.warnings.clone());
            let summary = format!(
                "layer-{} retrieval matched {} datasource(s)",
                outcome.layer,
                outcome.per_datasource.len()
            );
            delta = delta.with_reasoning(NODE, summary, 0);
            outcome
        },
        Ok(outcome) => {
            delta.warnings.extend(outcome.warnings.clone());
            delta.warnings.push("retrieval returned no candidates; using full schema".into());
            delta = delta.with_reasoning(NODE, "empty retrieval, full-snapshot fallback", 0);
            full_snapshot_signals(deps, &datasources)
        },
        Err(error) if error.severity == Severity::Fatal => return Err(error),
        Err(error) => {
            // Vector breaker open or index down: degrade to the full
            // snapshot rather than failing the request.
            delta.errors.push(error.into_warning());
            delta.warnings.push("vector retrieval unavailable; using full schema".into());
            delta = delta.with_reasoning(NODE, "retrieval unavailable, full-snapshot fallback", 0);
            full_snapshot_signals(deps, &datasources)
        },
    };

    if outcome.is_empty() {
        return Err(PipelineError::new(
            NODE,
            ErrorCode::NotFound,
            "no schema is registered for any accessible datasource",
        ));
    }
    delta.retrieval = Some(outcome);
    Ok(delta)
}
