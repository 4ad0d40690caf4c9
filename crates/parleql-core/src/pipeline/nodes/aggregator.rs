//! Aggregation: the single reduce stage.
//!
//! Executes the result plan with the in-process evaluator over the
//! sub-query frames. Hard rule: no LLM call on any path through here.

use std::collections::BTreeMap;

use parleql_error::{ErrorCode, PipelineError};

use crate::artifact::ResultFrame;
use crate::pipeline::state::{NodeDelta, PipelineState, SubQueryOutcome};
use crate::pipeline::PipelineDeps;
use crate::plan::evaluate;

pub const NODE: &str = "aggregator";

const ANSWER_PREVIEW_ROWS: usize = 5;

/// Deterministic rendering of the final frame.
fn render_answer(frame: &ResultFrame) -> String {
    if frame.num_rows == 0 {
        return String::from("The query completed and returned no rows.");
    }
    let mut out = format!(
        "The query returned {} row{}.",
        frame.num_rows,
        if frame.num_rows == 1 { "" } else { "s" }
    );
    for row in 0..frame.num_rows.min(ANSWER_PREVIEW_ROWS) {
        let cells: Vec<String> = frame
            .columns
            .iter()
            .map(|c| {
                let value = c.values.get(row).cloned().unwrap_or(serde_json::Value::Null);
                let rendered = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                format!("{}={}", c.name, rendered)
            })
            .collect();
        out.push_str(&format!("\n- {}", cells.join(", ")));
    }
    if frame.num_rows > ANSWER_PREVIEW_ROWS {
        out.push_str(&format!("\n... and {} more", frame.num_rows - ANSWER_PREVIEW_ROWS));
    }
    out
}

fn collect_sql(state: &PipelineState, required: &std::collections::BTreeSet<String>) -> String {
    required
        .iter()
        .filter_map(|id| state.sub_results.get(id).and_then(SubQueryOutcome::sql))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn run(deps: &PipelineDeps, state: &PipelineState) -> Result<NodeDelta, PipelineError> {
    let plan = state
        .result_plan
        .as_ref()
        .ok_or_else(|| PipelineError::new(NODE, ErrorCode::Internal, "no result plan was produced"))?;
    let required = plan.required_sub_queries();
    let mut delta = NodeDelta::default();

    // Execution disabled for the request: report the SQL we built.
    if !state.execute {
        let sql = collect_sql(state, &required);
        delta.final_answer = Some(format!(
            "Execution was disabled for this request. Generated SQL:\n{sql}"
        ));
        return Ok(delta.with_reasoning(NODE, "execution disabled; reported SQL only", 0));
    }

    // DB breaker open: degrade to the would-have-run answer. The
    // BREAKER_OPEN errors recorded by the executors stay in place.
    if required
        .iter()
        .any(|id| matches!(state.sub_results.get(id), Some(SubQueryOutcome::Degraded { .. })))
    {
        let sql = collect_sql(state, &required);
        delta.final_answer = Some(format!(
            "The datasource is currently unavailable. I would have executed the following SQL:\n{sql}"
        ));
        return Ok(delta.with_reasoning(NODE, "datasource breaker open; degraded answer", 0));
    }

    let mut frames: BTreeMap<String, ResultFrame> = BTreeMap::new();
    for id in &required {
        match state.sub_results.get(id) {
            Some(SubQueryOutcome::Completed { artifact, .. }) => {
                let frame = deps.artifacts.read(artifact).await.map_err(|e| {
                    PipelineError::new(NODE, ErrorCode::ArtifactIo, format!("cannot read artifact: {e}"))
                        .into_fatal()
                })?;
                frames.insert(id.clone(), frame);
            },
            _ => {
                // A required sub-query never completed; the cause is in the
                // error list already.
                let code = if state.errors.iter().any(|e| e.code == ErrorCode::PipelineTimeout) {
                    ErrorCode::PipelineTimeout
                } else {
                    ErrorCode::ExecutionFailed
                };
                return Err(PipelineError::new(
                    NODE,
                    code,
                    format!("required sub-query '{id}' produced no result"),
                )
                .into_fatal());
            },
        }
    }

    let frame = evaluate(plan, &frames).map_err(PipelineError::into_fatal)?;
    let summary = format!("aggregated {} sub-result(s) into {} row(s)", required.len(), frame.num_rows);
    delta.final_answer = Some(render_answer(&frame));
    delta.execution = Some(frame);
    Ok(delta.with_reasoning(NODE, summary, 0))
}
