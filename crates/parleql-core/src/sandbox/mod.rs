//! Crash-isolated execution of adapter work.
//!
//! Two pools with independent bounded concurrency: the execute pool serves
//! latency-sensitive query work (`execute`, `dry_run`, `cost_estimate`);
//! the index pool serves throughput-heavy schema fetches. Every task runs
//! under its own deadline and a panic guard: a hang is killed at the
//! deadline and a Rust panic recycles the worker without touching the
//! parent. The boundary is in-process, so it does not contain a native
//! crash (segfault/abort) in an FFI driver; adapters that load native
//! drivers must provide the OS-process boundary themselves, e.g. a
//! subprocess-backed [`DatasourceAdapter`] whose worker death surfaces
//! here as `SANDBOX_CRASH`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parleql_error::{ErrorCode, PipelineError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::db::{AdapterError, DatasourceAdapter, DryRunReport, ExecLimits, QueryRows};
use crate::observability::Meter;
use crate::resilience::CancellationToken;
use crate::schema::SchemaSnapshot;

/// Which pool a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Execute,
    Index,
}

impl PoolKind {
    fn label(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Index => "index",
        }
    }
}

/// What a task should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    Execute,
    DryRun,
    CostEstimate,
    FetchSchema,
}

/// One unit of sandboxed work.
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub mode: TaskMode,
    pub datasource_id: String,
    pub sql: Option<String>,
    pub limits: ExecLimits,
    /// Hard per-task deadline; the in-flight call is killed when it fires.
    pub deadline: Duration,
}

/// Task results, by mode.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Rows(QueryRows),
    DryRun(DryRunReport),
    Cost(f64),
    Schema(SchemaSnapshot),
}

/// Sandbox failure modes surfaced to callers.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox task deadline expired")]
    Deadline,

    #[error("sandbox worker crashed")]
    Crash,

    #[error("task cancelled")]
    Cancelled,

    #[error("sandbox is shut down")]
    Closed,

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl SandboxError {
    /// Map to the pipeline error vocabulary for node `node`.
    pub fn into_pipeline(self, node: &'static str) -> PipelineError {
        match self {
            Self::Deadline => {
                PipelineError::new(node, ErrorCode::ExecutionFailed, "sandbox task deadline expired")
            },
            Self::Crash => PipelineError::new(node, ErrorCode::SandboxCrash, "sandbox worker crashed"),
            Self::Cancelled => PipelineError::new(node, ErrorCode::Cancelled, "request cancelled"),
            Self::Closed => PipelineError::new(node, ErrorCode::Internal, "sandbox is shut down"),
            Self::Adapter(error) => match &error {
                AdapterError::Unavailable { .. } => {
                    PipelineError::new(node, ErrorCode::AdapterUnavailable, "datasource unavailable")
                },
                AdapterError::Timeout { timeout_ms } => PipelineError::new(
                    node,
                    ErrorCode::ExecutionFailed,
                    format!("statement timed out after {timeout_ms}ms"),
                ),
                AdapterError::Query { message, .. } => {
                    PipelineError::new(node, ErrorCode::ExecutionFailed, format!("query failed: {message}"))
                },
                AdapterError::Unsupported { operation } => PipelineError::new(
                    node,
                    ErrorCode::ExecutionFailed,
                    format!("operation not supported: {operation}"),
                ),
            },
        }
    }

    /// Whether the DB breaker should count this outcome.
    pub fn is_counted_failure(&self) -> bool {
        match self {
            Self::Deadline | Self::Crash => true,
            Self::Adapter(error) => error.is_transient(),
            Self::Cancelled | Self::Closed => false,
        }
    }
}

struct Job {
    envelope: TaskEnvelope,
    adapter: Arc<dyn DatasourceAdapter>,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<TaskOutput, SandboxError>>,
}

/// The two-pool sandbox.
pub struct SandboxManager {
    exec_tx: mpsc::Sender<Job>,
    index_tx: mpsc::Sender<Job>,
}

impl SandboxManager {
    pub fn new(exec_workers: usize, index_workers: usize, meter: Arc<dyn Meter>) -> Self {
        let exec_tx = spawn_pool(PoolKind::Execute, exec_workers.max(1), Arc::clone(&meter));
        let index_tx = spawn_pool(PoolKind::Index, index_workers.max(1), meter);
        Self { exec_tx, index_tx }
    }

    /// Submit a task and wait for its outcome.
    ///
    /// Suspends while the pool is saturated; cancellation wins over both
    /// queueing and execution.
    pub async fn submit(
        &self,
        pool: PoolKind,
        envelope: TaskEnvelope,
        adapter: Arc<dyn DatasourceAdapter>,
        cancel: &CancellationToken,
    ) -> Result<TaskOutput, SandboxError> {
        let tx = match pool {
            PoolKind::Execute => &self.exec_tx,
            PoolKind::Index => &self.index_tx,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job { envelope, adapter, cancel: cancel.clone(), reply: reply_tx };

        tokio::select! {
            () = cancel.cancelled() => return Err(SandboxError::Cancelled),
            sent = tx.send(job) => {
                if sent.is_err() {
                    return Err(SandboxError::Closed);
                }
            },
        }
        tokio::select! {
            () = cancel.cancelled() => Err(SandboxError::Cancelled),
            outcome = reply_rx => outcome.unwrap_or(Err(SandboxError::Closed)),
        }
    }
}

fn spawn_pool(kind: PoolKind, workers: usize, meter: Arc<dyn Meter>) -> mpsc::Sender<Job> {
    let (tx, rx) = mpsc::channel::<Job>(workers * 4);
    let rx = Arc::new(Mutex::new(rx));
    for worker_id in 0..workers {
        let rx = Arc::clone(&rx);
        let meter = Arc::clone(&meter);
        tokio::spawn(worker_loop(kind, worker_id, rx, meter));
    }
    tx
}

async fn worker_loop(
    kind: PoolKind,
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    meter: Arc<dyn Meter>,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            return;
        };
        let started = std::time::Instant::now();
        let outcome = run_job(&job).await;
        meter.record_duration("sandbox.task.duration", kind.label(), started.elapsed());
        if matches!(outcome, Err(SandboxError::Crash)) {
            // The panic was contained; the worker keeps serving, which is
            // the recycle step for an in-process pool.
            meter.incr_counter("sandbox_crash_total", kind.label(), 1);
            tracing::error!(pool = kind.label(), worker_id, "sandbox worker caught a crash");
        }
        let _ = job.reply.send(outcome);
    }
}

async fn run_job(job: &Job) -> Result<TaskOutput, SandboxError> {
    let task = run_task(Arc::clone(&job.adapter), job.envelope.clone());
    let guarded = AssertUnwindSafe(task).catch_unwind();
    tokio::select! {
        () = job.cancel.cancelled() => Err(SandboxError::Cancelled),
        outcome = tokio::time::timeout(job.envelope.deadline, guarded) => match outcome {
            // Deadline fired: the in-flight future was dropped (killed).
            Err(_) => Err(SandboxError::Deadline),
            Ok(Err(_panic)) => Err(SandboxError::Crash),
            Ok(Ok(result)) => result,
        },
    }
}

async fn run_task(
    adapter: Arc<dyn DatasourceAdapter>,
    envelope: TaskEnvelope,
) -> Result<TaskOutput, SandboxError> {
    match envelope.mode {
        TaskMode::Execute => {
            let sql = envelope
                .sql
                .as_deref()
                .ok_or_else(|| AdapterError::Query { message: "no sql to execute".into(), sql_state: None })?;
            let mut rows = adapter.execute(sql, &envelope.limits).await?;
            enforce_limits(&mut rows, &envelope.limits)?;
            Ok(TaskOutput::Rows(rows))
        },
        TaskMode::DryRun => {
            let sql = envelope
                .sql
                .as_deref()
                .ok_or_else(|| AdapterError::Query { message: "no sql to dry-run".into(), sql_state: None })?;
            Ok(TaskOutput::DryRun(adapter.dry_run(sql).await?))
        },
        TaskMode::CostEstimate => {
            let sql = envelope
                .sql
                .as_deref()
                .ok_or_else(|| AdapterError::Query { message: "no sql to estimate".into(), sql_state: None })?;
            Ok(TaskOutput::Cost(adapter.cost_estimate(sql).await?))
        },
        TaskMode::FetchSchema => Ok(TaskOutput::Schema(adapter.fetch_schema().await?)),
    }
}

fn enforce_limits(rows: &mut QueryRows, limits: &ExecLimits) -> Result<(), SandboxError> {
    if limits.max_rows > 0 && rows.rows.len() as u64 > limits.max_rows {
        rows.rows.truncate(limits.max_rows as usize);
    }
    if limits.max_bytes > 0 {
        let approx: usize = rows
            .rows
            .iter()
            .map(|row| serde_json::to_string(row).map(|s| s.len()).unwrap_or(0))
            .sum();
        if approx as u64 > limits.max_bytes {
            return Err(SandboxError::Adapter(AdapterError::Query {
                message: format!("result set exceeds byte limit ({approx} > {})", limits.max_bytes),
                sql_state: None,
            }));
        }
    }
    Ok(())
}
