//! Planning: one sub-query becomes a typed logical plan.

use parleql_error::{ErrorCode, PipelineError};

use crate::observability::RequestContext;
use crate::pipeline::state::SubQuery;
use crate::pipeline::PipelineDeps;
use crate::plan::PlanModel;
use crate::resilience::CancellationToken;
use crate::schema::SchemaSnapshot;

use super::parse_structured;

pub const NODE: &str = "planner";

const SYSTEM_PROMPT: &str = "You plan one SELECT over one datasource as a JSON logical plan. \
Respond with one JSON object matching this shape exactly: \
{\"statement_type\": \"select\", \"datasource_id\": string, \
\"from\": {\"table\": string, \"alias\": string|null}, \
\"joins\": [{\"table\": {\"table\": string, \"alias\": string|null}, \"kind\": \"inner\"|\"left\", \
\"on\": EXPR}], \"select_items\": [{\"expr\": EXPR, \"alias\": string|null}], \
\"filter\": EXPR|null, \"group_by\": [EXPR], \
\"order_by\": [{\"expr\": EXPR, \"descending\": bool}], \"limit\": int|null}. \
EXPR is one of: {\"type\": \"column\", \"table\": string|null, \"name\": string}; \
{\"type\": \"literal\", \"kind\": \"int\"|\"float\"|\"text\"|\"bool\", \"value\": ...} or \
{\"type\": \"literal\", \"kind\": \"null\"}; \
{\"type\": \"binary\", \"op\": \"eq\"|\"not_eq\"|\"lt\"|\"lt_eq\"|\"gt\"|\"gt_eq\"|\"and\"|\"or\"|\
\"add\"|\"sub\"|\"mul\"|\"div\"|\"like\", \"left\": EXPR, \"right\": EXPR}; \
{\"type\": \"aggregate\", \"func\": \"count\"|\"sum\"|\"avg\"|\"min\"|\"max\", \"arg\": EXPR|null, \
\"distinct\": bool}; \
{\"type\": \"function\", \"func\": \"lower\"|\"upper\"|\"coalesce\"|\"abs\"|\"round\", \"args\": [EXPR]}. \
Use only tables and columns from the provided schema. Never invent names.";

fn render_schema(snapshot: &SchemaSnapshot, candidate_tables: &[String]) -> String {
    let mut out = String::new();
    for table in &snapshot.tables {
        if !candidate_tables.is_empty() && !candidate_tables.contains(&table.name) {
            continue;
        }
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        out.push_str(&format!("table {} ({})\n", table.name, columns.join(", ")));
        for fk in &table.foreign_keys {
            out.push_str(&format!(
                "  {}.{} references {}.{}\n",
                table.name, fk.column, fk.references_table, fk.references_column
            ));
        }
    }
    out
}

/// Produce a plan for `sub_query`, optionally steered by refiner feedback.
pub async fn run(
    deps: &PipelineDeps,
    ctx: &RequestContext,
    sub_query: &SubQuery,
    snapshot: &SchemaSnapshot,
    candidate_tables: &[String],
    feedback: Option<&str>,
    cancel: &CancellationToken,
) -> Result<PlanModel, PipelineError> {
    let mut user = format!(
        "Datasource: {}\nQuestion: {}\n\nSchema:\n{}",
        sub_query.datasource_id,
        sub_query.text,
        render_schema(snapshot, candidate_tables)
    );
    if let Some(feedback) = feedback {
        user.push_str(&format!("\nPrevious attempt failed. Feedback: {feedback}\n"));
    }

    let completion = deps
        .llm
        .invoke(NODE, NODE, ctx, SYSTEM_PROMPT.to_string(), user, cancel)
        .await
        .map_err(|e| e.for_sub_query(&sub_query.id))?;

    let mut plan = parse_structured::<PlanModel>(&completion.text).map_err(|e| {
        PipelineError::new(
            NODE,
            ErrorCode::LogicalValidationFailed,
            format!("planner output was not a valid logical plan: {e}"),
        )
        .for_sub_query(&sub_query.id)
    })?;

    // The sub-query's binding is authoritative regardless of what the
    // model wrote.
    plan.datasource_id = sub_query.datasource_id.clone();
    Ok(plan)
}
