//! Semantic analysis: normalize the question, extract entities and hints.

use parleql_error::PipelineError;
use serde::Deserialize;

use crate::pipeline::state::{NodeDelta, PipelineState};
use crate::pipeline::PipelineDeps;
use crate::resilience::CancellationToken;

use super::{llm_terminal, parse_structured};

pub const NODE: &str = "semantic";

const SYSTEM_PROMPT: &str = "You normalize analytics questions for a SQL engine. \
Respond with one JSON object: {\"normalized\": string, \"entities\": [string], \"hints\": [string]}. \
Normalize spelling and phrasing without changing meaning; entities are business nouns \
(tables, metrics, dimensions, time ranges); hints are short planning notes.";

#[derive(Debug, Deserialize)]
struct SemanticOutput {
    normalized: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    hints: Vec<String>,
}

pub async fn run(
    deps: &PipelineDeps,
    state: &PipelineState,
    cancel: &CancellationToken,
) -> Result<NodeDelta, PipelineError> {
    let completion = deps
        .llm
        .invoke(
            "default",
            NODE,
            &state.ctx,
            SYSTEM_PROMPT.to_string(),
            state.user_query.clone(),
            cancel,
        )
        .await
        .map_err(|e| llm_terminal(NODE, e))?;

    let mut delta = NodeDelta::default();
    match parse_structured::<SemanticOutput>(&completion.text) {
        Ok(output) => {
            delta.normalized_query = Some(output.normalized);
            delta.entities = output.entities;
            delta.hints = output.hints;
        },
        Err(_) => {
            // An unparseable normalization is not worth failing the request.
            delta.warnings.push("semantic analysis output was not parseable; using the raw question".into());
            delta.normalized_query = Some(state.user_query.trim().to_string());
        },
    }
    let summary = format!(
        "normalized question, {} entities, {} hints",
        delta.entities.len(),
        delta.hints.len()
    );
    Ok(delta.with_reasoning(NODE, summary, 0))
}
