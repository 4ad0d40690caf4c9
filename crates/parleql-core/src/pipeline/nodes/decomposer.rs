//! Decomposition: the question becomes a DAG of single-datasource
//! sub-queries plus the aggregation recipe.

use std::collections::BTreeSet;

use parleql_error::{ErrorCode, PipelineError};
use serde::Deserialize;

use crate::pipeline::runtime::topological_layers;
use crate::pipeline::state::{NodeDelta, PipelineState, SubQuery};
use crate::pipeline::PipelineDeps;
use crate::plan::{JoinKind, ResultPlan, ResultPlanNode, SortKey};
use crate::resilience::CancellationToken;
use crate::vector::RetrievalOutcome;

use super::{llm_terminal, parse_structured};

pub const NODE: &str = "decomposer";

const SYSTEM_PROMPT: &str = "You split an analytics question across registered datasources. \
Respond with one JSON object: {\"sub_queries\": [{\"id\": string, \"text\": string, \
\"datasource_id\": string, \"depends_on\": [string]}], \"combine\": {\"op\": \"union\"|\"join\", \
\"join_on\": [{\"left\": string, \"right\": string}], \"order_by\": [{\"column\": string, \
\"descending\": bool}], \"limit\": int|null}|null}. \
Rules: route only to the datasources listed below. A matched example counts as a valid \
routing signal for its datasource even when no table matched there. Questions answerable \
by one datasource produce exactly one sub-query. Sub-queries must form an acyclic \
dependency graph.";

#[derive(Debug, Deserialize)]
struct SubQuerySpec {
    #[serde(default)]
    id: Option<String>,
    text: String,
    datasource_id: String,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CombineOp {
    Union,
    Join,
}

#[derive(Debug, Deserialize)]
struct JoinOn {
    left: String,
    right: String,
}

#[derive(Debug, Deserialize)]
struct CombineSpec {
    op: CombineOp,
    #[serde(default)]
    join_on: Vec<JoinOn>,
    #[serde(default)]
    order_by: Vec<SortKey>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DecomposerOutput {
    sub_queries: Vec<SubQuerySpec>,
    #[serde(default)]
    combine: Option<CombineSpec>,
}

fn render_signals(retrieval: &RetrievalOutcome) -> String {
    let mut out = String::new();
    for (ds, signals) in &retrieval.per_datasource {
        out.push_str(&format!("- datasource '{ds}':"));
        if !signals.tables.is_empty() {
            let tables: Vec<&str> = signals.tables.iter().map(String::as_str).collect();
            out.push_str(&format!(" tables [{}]", tables.join(", ")));
        }
        if !signals.examples.is_empty() {
            out.push_str(&format!(" examples [{}]", signals.examples.join("; ")));
        }
        out.push('\n');
    }
    out
}

fn single(sub_query_text: &str, datasource_id: &str) -> (Vec<SubQuery>, ResultPlan) {
    let sub_query = SubQuery {
        id: "sq_0".into(),
        text: sub_query_text.to_string(),
        datasource_id: datasource_id.to_string(),
        depends_on: vec![],
    };
    let plan = ResultPlan::passthrough("sq_0");
    (vec![sub_query], plan)
}

fn build_result_plan(sub_queries: &[SubQuery], combine: Option<&CombineSpec>) -> ResultPlan {
    if sub_queries.len() == 1 {
        return ResultPlan::passthrough(sub_queries[0].id.clone());
    }
    let scans: Vec<ResultPlanNode> = sub_queries
        .iter()
        .map(|sq| ResultPlanNode::Scan { sub_query: sq.id.clone() })
        .collect();

    let mut root = match combine {
        Some(spec) if spec.op == CombineOp::Join && !spec.join_on.is_empty() => {
            let on: Vec<(String, String)> =
                spec.join_on.iter().map(|j| (j.left.clone(), j.right.clone())).collect();
            let mut iter = scans.into_iter();
            let first = iter.next().expect("at least two sub-queries");
            iter.fold(first, |left, right| ResultPlanNode::Join {
                left: Box::new(left),
                right: Box::new(right),
                kind: JoinKind::Inner,
                on: on.clone(),
            })
        },
        _ => ResultPlanNode::Union { inputs: scans },
    };

    if let Some(spec) = combine {
        if !spec.order_by.is_empty() || spec.limit.is_some() {
            root = ResultPlanNode::OrderLimit {
                input: Box::new(root),
                order_by: spec.order_by.clone(),
                limit: spec.limit,
            };
        }
    }
    ResultPlan { root }
}

pub async fn run(
    deps: &PipelineDeps,
    state: &PipelineState,
    cancel: &CancellationToken,
) -> Result<NodeDelta, PipelineError> {
    let retrieval = state
        .retrieval
        .as_ref()
        .ok_or_else(|| PipelineError::new(NODE, ErrorCode::Internal, "retrieval ran out of order"))?;

    let mut delta = NodeDelta::default();

    // A caller-pinned datasource skips routing entirely.
    if let Some(target) = &state.target_datasource {
        if !deps.registry.contains(target) {
            return Err(PipelineError::new(
                NODE,
                ErrorCode::NotFound,
                format!("datasource '{target}' is not registered"),
            ));
        }
        let (sub_queries, plan) = single(state.effective_query(), target);
        delta.sub_queries = Some(sub_queries);
        delta.result_plan = Some(plan);
        return Ok(delta.with_reasoning(NODE, format!("pinned to datasource '{target}'"), 0));
    }

    // One candidate datasource needs no routing model either.
    if retrieval.per_datasource.len() == 1 {
        let ds = retrieval.per_datasource.keys().next().expect("one entry").clone();
        let (sub_queries, plan) = single(state.effective_query(), &ds);
        delta.sub_queries = Some(sub_queries);
        delta.result_plan = Some(plan);
        return Ok(delta.with_reasoning(NODE, format!("single candidate datasource '{ds}'"), 0));
    }

    let user = format!(
        "Question: {}\n\nDatasources and matched signals:\n{}",
        state.effective_query(),
        render_signals(retrieval)
    );
    let completion = deps
        .llm
        .invoke(NODE, NODE, &state.ctx, SYSTEM_PROMPT.to_string(), user, cancel)
        .await
        .map_err(|e| llm_terminal(NODE, e))?;

    let output = parse_structured::<DecomposerOutput>(&completion.text).map_err(|e| {
        PipelineError::new(NODE, ErrorCode::LogicalValidationFailed, format!("decomposition was not parseable: {e}"))
    })?;

    // Keep only sub-queries routed to a datasource with a signal; anything
    // else is a hallucinated route.
    let mut sub_queries = Vec::new();
    let mut seen_ids = BTreeSet::new();
    for (index, spec) in output.sub_queries.into_iter().enumerate() {
        if !retrieval.per_datasource.contains_key(&spec.datasource_id)
            || !deps.registry.contains(&spec.datasource_id)
        {
            delta.warnings.push(format!(
                "dropped sub-query routed to unmatched datasource '{}'",
                spec.datasource_id
            ));
            continue;
        }
        let mut id = spec.id.unwrap_or_else(|| format!("sq_{index}"));
        if id.is_empty() || seen_ids.contains(&id) {
            id = format!("sq_{index}");
        }
        seen_ids.insert(id.clone());
        sub_queries.push(SubQuery {
            id,
            text: spec.text,
            datasource_id: spec.datasource_id,
            depends_on: spec.depends_on,
        });
    }
    // Dependencies on dropped or unknown sub-queries are removed.
    for sub_query in &mut sub_queries {
        sub_query.depends_on.retain(|dep| seen_ids.contains(dep));
    }

    if sub_queries.is_empty() {
        return Err(PipelineError::new(
            NODE,
            ErrorCode::NotFound,
            "no sub-query could be routed to a matched datasource",
        ));
    }
    if let Err(message) = topological_layers(&sub_queries) {
        return Err(PipelineError::new(NODE, ErrorCode::LogicalValidationFailed, message));
    }

    let plan = build_result_plan(&sub_queries, output.combine.as_ref());
    let summary = format!("{} sub-query(ies) across datasources", sub_queries.len());
    delta.sub_queries = Some(sub_queries);
    delta.result_plan = Some(plan);
    Ok(delta.with_reasoning(NODE, summary, 0))
}
