//! The per-sub-query SQL agent.
//!
//! State machine: `Planning → Validating → Generating → DryRun → Executing
//! → Done`, with backward edges through `Refining` on retryable failures.
//! Fatal codes and an open breaker skip retries; every transition checks
//! cancellation. Terminal success writes the sub-result; exhaustion writes
//! a fatal error tagged with the sub-query id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parleql_error::{ErrorCode, PipelineError};

use crate::artifact::{ArtifactMeta, ResultFrame};
use crate::db::{AdapterHandle, ExecLimits};
use crate::plan::PlanModel;
use crate::resilience::{CallOutcome, CancellationToken};
use crate::sandbox::{PoolKind, SandboxError, TaskEnvelope, TaskMode, TaskOutput};
use crate::sqlgen::generate_sql;

use super::nodes::{logical_validator, planner};
use super::state::{NodeDelta, PipelineState, ReasoningStep, SubQuery, SubQueryOutcome};
use super::PipelineDeps;

pub const SUBGRAPH: &str = "sql_agent";
const EXECUTOR_NODE: &str = "executor";
const PHYSICAL_NODE: &str = "physical_validator";
const REFINER_NODE: &str = "refiner";

/// Extra headroom on the sandbox deadline beyond the statement timeout.
const SANDBOX_DEADLINE_MARGIN: Duration = Duration::from_secs(5);

enum GuardedError {
    BreakerOpen,
    Sandbox(SandboxError),
}

async fn guarded_submit(
    deps: &PipelineDeps,
    envelope: TaskEnvelope,
    handle: &AdapterHandle,
    cancel: &CancellationToken,
) -> Result<TaskOutput, GuardedError> {
    let Some(permit) = deps.db_breaker.try_acquire().await else {
        return Err(GuardedError::BreakerOpen);
    };
    match deps
        .sandbox
        .submit(PoolKind::Execute, envelope, Arc::clone(&handle.adapter), cancel)
        .await
    {
        Ok(output) => {
            deps.db_breaker.record(permit, CallOutcome::Success).await;
            Ok(output)
        },
        Err(error) => {
            let outcome = if error.is_counted_failure() {
                CallOutcome::Failure
            } else {
                CallOutcome::Ignored
            };
            deps.db_breaker.record(permit, outcome).await;
            Err(GuardedError::Sandbox(error))
        },
    }
}

fn limits_for(handle: &AdapterHandle, deps: &PipelineDeps) -> ExecLimits {
    let defaults = deps.settings.default_limits();
    ExecLimits {
        max_rows: handle.config.row_limit.unwrap_or(defaults.max_rows),
        max_bytes: handle.config.max_bytes.unwrap_or(defaults.max_bytes),
        statement_timeout_ms: handle
            .config
            .statement_timeout_ms
            .unwrap_or(defaults.statement_timeout_ms),
    }
}

/// Sanitized feedback for the next planning attempt. Engine-generated
/// validation text is safe to pass along; anything that may embed external
/// error text is reduced to its code.
fn compose_feedback(error: &PipelineError, sql: Option<&str>) -> String {
    let detail = match error.code {
        ErrorCode::LogicalValidationFailed | ErrorCode::MissingSql => error.message.clone(),
        code => format!("the previous attempt failed with code {code}"),
    };
    match sql {
        Some(sql) => format!("{detail}. Failing SQL: {sql}"),
        None => detail,
    }
}

struct AgentRun {
    delta: NodeDelta,
    attempt_errors: Vec<PipelineError>,
    reasoning: Vec<ReasoningStep>,
}

impl AgentRun {
    fn step(&mut self, node: &str, summary: impl Into<String>, started: Instant) {
        self.reasoning.push(ReasoningStep {
            node: node.to_string(),
            summary: summary.into(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }
}

/// Run the agent for one sub-query. Never returns an error: every outcome
/// is encoded in the returned delta.
pub async fn run_agent(
    deps: Arc<PipelineDeps>,
    state: PipelineState,
    sub_query: SubQuery,
    cancel: CancellationToken,
) -> NodeDelta {
    let mut run = AgentRun {
        delta: NodeDelta::default(),
        attempt_errors: Vec::new(),
        reasoning: Vec::new(),
    };
    let outcome = agent_loop(&deps, &state, &sub_query, &cancel, &mut run).await;

    match outcome {
        Ok(result) => {
            // Recovered attempts leave their errors behind as warnings.
            let recovered = !run.attempt_errors.is_empty();
            for error in run.attempt_errors.drain(..) {
                run.delta.errors.push(error.into_warning());
            }
            if recovered {
                run.delta
                    .warnings
                    .push(format!("sub-query '{}' succeeded after refinement", sub_query.id));
            }
            run.delta.sub_results.push((sub_query.id.clone(), result));
        },
        Err(error) => {
            for attempt in run.attempt_errors.drain(..) {
                run.delta.errors.push(attempt);
            }
            run.delta.errors.push(error);
            run.delta.sub_results.push((sub_query.id.clone(), SubQueryOutcome::Failed));
        },
    }
    run.delta.reasoning.append(&mut run.reasoning);
    run.delta
}

async fn agent_loop(
    deps: &PipelineDeps,
    state: &PipelineState,
    sub_query: &SubQuery,
    cancel: &CancellationToken,
    run: &mut AgentRun,
) -> Result<SubQueryOutcome, PipelineError> {
    let handle = deps.registry.get(&sub_query.datasource_id).map_err(|_| {
        PipelineError::new(SUBGRAPH, ErrorCode::AdapterUnavailable, "datasource is not registered")
            .for_sub_query(&sub_query.id)
    })?;
    let version = deps.schema_store.get(&sub_query.datasource_id, None).map_err(|_| {
        PipelineError::new(
            SUBGRAPH,
            ErrorCode::AdapterUnavailable,
            "no schema snapshot is registered for the datasource",
        )
        .for_sub_query(&sub_query.id)
    })?;
    let candidate_tables: Vec<String> = state
        .retrieval
        .as_ref()
        .and_then(|r| r.per_datasource.get(&sub_query.datasource_id))
        .map(|signals| signals.tables.iter().cloned().collect())
        .unwrap_or_default();

    let caps = handle.adapter.capabilities();
    let limits = limits_for(&handle, deps);
    let retry_policy = deps.settings.retry_policy();
    let mut feedback: Option<String> = None;
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::new(SUBGRAPH, ErrorCode::Cancelled, "request cancelled")
                .for_sub_query(&sub_query.id));
        }

        match attempt_once(
            deps,
            state,
            sub_query,
            &handle,
            &version.snapshot,
            &version.version_id,
            &candidate_tables,
            &caps,
            &limits,
            feedback.as_deref(),
            cancel,
            run,
        )
        .await
        {
            Ok(outcome) => return Ok(outcome),
            Err((error, failing_sql)) => {
                let retryable = error.retryable && !error.is_fatal();
                if !retryable {
                    return Err(error);
                }
                if !retry_policy.allows(attempt + 1) {
                    run.attempt_errors.push(error);
                    return Err(PipelineError::new(
                        SUBGRAPH,
                        ErrorCode::ExecutionFailed,
                        format!("sub-query failed after {} attempt(s)", attempt + 1),
                    )
                    .into_fatal()
                    .for_sub_query(&sub_query.id));
                }

                // Refining: compose feedback and loop back to planning.
                let started = Instant::now();
                let mut message = compose_feedback(&error, failing_sql.as_deref());
                if deps.llm.has_agent(REFINER_NODE) {
                    if let Ok(completion) = deps
                        .llm
                        .invoke(
                            REFINER_NODE,
                            REFINER_NODE,
                            &state.ctx,
                            "Rewrite this SQL planning failure into one short, actionable \
                             instruction for the planner. Respond with plain text."
                                .to_string(),
                            message.clone(),
                            cancel,
                        )
                        .await
                    {
                        let text = completion.text.trim();
                        if !text.is_empty() {
                            message = text.to_string();
                        }
                    }
                }
                run.step(REFINER_NODE, format!("attempt {} failed: {}", attempt + 1, error.code), started);
                run.attempt_errors.push(error);
                run.delta.retry_counts.push((sub_query.id.clone(), 1));
                feedback = Some(message);
                attempt += 1;

                let delay = retry_policy.delay_for(attempt.saturating_sub(1));
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(PipelineError::new(SUBGRAPH, ErrorCode::Cancelled, "request cancelled")
                            .for_sub_query(&sub_query.id));
                    },
                    () = tokio::time::sleep(delay) => {},
                }
            },
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn attempt_once(
    deps: &PipelineDeps,
    state: &PipelineState,
    sub_query: &SubQuery,
    handle: &AdapterHandle,
    snapshot: &crate::schema::SchemaSnapshot,
    schema_version: &str,
    candidate_tables: &[String],
    caps: &crate::db::AdapterCapabilities,
    limits: &ExecLimits,
    feedback: Option<&str>,
    cancel: &CancellationToken,
    run: &mut AgentRun,
) -> Result<SubQueryOutcome, (PipelineError, Option<String>)> {
    // Planning.
    let started = Instant::now();
    let plan: PlanModel =
        planner::run(deps, &state.ctx, sub_query, snapshot, candidate_tables, feedback, cancel)
            .await
            .map_err(|e| (e, None))?;
    run.step(planner::NODE, format!("planned over table '{}'", plan.from.table), started);

    // Validating.
    let started = Instant::now();
    let policies = deps.policies.read().clone();
    let warnings = logical_validator::validate(
        &plan,
        snapshot,
        &policies,
        &state.user_context,
        deps.settings.logical_validator_strict_columns,
        &sub_query.id,
    )
    .map_err(|e| (e, None))?;
    run.delta.warnings.extend(warnings);
    run.step(logical_validator::NODE, "plan validated against schema and policy", started);

    // Generating.
    let started = Instant::now();
    let sql = generate_sql(&plan, caps).map_err(|e| (e.for_sub_query(&sub_query.id), None))?;
    run.delta.sql_draft = Some(sql.clone());
    run.step("generator", format!("generated {} dialect SQL", caps.dialect), started);

    let deadline = Duration::from_millis(limits.statement_timeout_ms) + SANDBOX_DEADLINE_MARGIN;

    // Dry run.
    if caps.supports_dry_run {
        let started = Instant::now();
        let envelope = TaskEnvelope {
            mode: TaskMode::DryRun,
            datasource_id: sub_query.datasource_id.clone(),
            sql: Some(sql.clone()),
            limits: *limits,
            deadline,
        };
        match guarded_submit(deps, envelope, handle, cancel).await {
            Ok(TaskOutput::DryRun(report)) => {
                if !report.ok {
                    return Err((
                        PipelineError::new(
                            PHYSICAL_NODE,
                            ErrorCode::DryRunFailed,
                            "the statement failed validation against the engine",
                        )
                        .for_sub_query(&sub_query.id),
                        Some(sql),
                    ));
                }
                if let Some(estimated) = report.estimated_rows {
                    if estimated > limits.max_rows {
                        return Err((
                            PipelineError::new(
                                PHYSICAL_NODE,
                                ErrorCode::DryRunFailed,
                                format!("estimated rows {estimated} exceed the row limit {}", limits.max_rows),
                            )
                            .for_sub_query(&sub_query.id),
                            Some(sql),
                        ));
                    }
                }
                run.step(PHYSICAL_NODE, "dry run passed", started);
            },
            Ok(_) => {},
            Err(GuardedError::BreakerOpen) => {
                return breaker_open_outcome(sub_query, sql, run);
            },
            Err(GuardedError::Sandbox(error)) => {
                return Err((
                    error.into_pipeline(PHYSICAL_NODE).for_sub_query(&sub_query.id),
                    Some(sql),
                ));
            },
        }
    } else if caps.supports_cost_estimate {
        let started = Instant::now();
        let envelope = TaskEnvelope {
            mode: TaskMode::CostEstimate,
            datasource_id: sub_query.datasource_id.clone(),
            sql: Some(sql.clone()),
            limits: *limits,
            deadline,
        };
        if let Ok(TaskOutput::Cost(cost)) = guarded_submit(deps, envelope, handle, cancel).await {
            run.step(PHYSICAL_NODE, format!("estimated cost {cost:.1}"), started);
        }
    }

    // Executing (or reporting SQL only).
    if !state.execute {
        return Ok(SubQueryOutcome::SkippedExecution { sql });
    }
    let started = Instant::now();
    let envelope = TaskEnvelope {
        mode: TaskMode::Execute,
        datasource_id: sub_query.datasource_id.clone(),
        sql: Some(sql.clone()),
        limits: *limits,
        deadline,
    };
    match guarded_submit(deps, envelope, handle, cancel).await {
        Ok(TaskOutput::Rows(rows)) => {
            let frame = ResultFrame::from_query_rows(rows);
            let meta = ArtifactMeta {
                tenant_id: state.ctx.tenant_id.clone(),
                request_id: state.ctx.trace_id.clone(),
                subgraph_name: SUBGRAPH.to_string(),
                dag_node_id: sub_query.id.clone(),
                schema_version: schema_version.to_string(),
            };
            let artifact = deps.artifacts.create_artifact_ref(meta, &frame).await.map_err(|e| {
                (
                    PipelineError::new(EXECUTOR_NODE, ErrorCode::ArtifactIo, format!("cannot persist result: {e}"))
                        .for_sub_query(&sub_query.id),
                    Some(sql.clone()),
                )
            })?;
            run.step(EXECUTOR_NODE, format!("executed, {} row(s)", frame.num_rows), started);
            Ok(SubQueryOutcome::Completed { artifact, sql })
        },
        Ok(_) => Err((
            PipelineError::new(EXECUTOR_NODE, ErrorCode::Internal, "sandbox returned a mismatched output")
                .for_sub_query(&sub_query.id),
            Some(sql),
        )),
        Err(GuardedError::BreakerOpen) => breaker_open_outcome(sub_query, sql, run),
        Err(GuardedError::Sandbox(error)) => Err((
            error.into_pipeline(EXECUTOR_NODE).for_sub_query(&sub_query.id),
            Some(sql),
        )),
    }
}

/// Breaker open short-circuits the loop: record the error, keep the SQL so
/// the aggregator can compose the degraded answer.
fn breaker_open_outcome(
    sub_query: &SubQuery,
    sql: String,
    run: &mut AgentRun,
) -> Result<SubQueryOutcome, (PipelineError, Option<String>)> {
    run.delta.errors.push(
        PipelineError::new(EXECUTOR_NODE, ErrorCode::BreakerOpen, "datasource breaker is open")
            .for_sub_query(&sub_query.id),
    );
    Ok(SubQueryOutcome::Degraded { sql })
}
