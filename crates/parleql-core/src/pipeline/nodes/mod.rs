//! Stage nodes.
//!
//! Each node is a pure transformation from a state snapshot to a
//! [`NodeDelta`]; [`traced_node`] wraps execution with a span bound to the
//! trace id, a duration histogram sample, and a panic guard.

pub mod aggregator;
pub mod decomposer;
pub mod intent;
pub mod logical_validator;
pub mod planner;
pub mod retriever;
pub mod semantic;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parleql_error::{ErrorCode, PipelineError};
use tracing::Instrument;

use crate::observability::{Meter, RequestContext};

use super::state::NodeDelta;

/// Run a node with tracing, timing and panic containment.
pub async fn traced_node<Fut>(
    name: &'static str,
    ctx: &RequestContext,
    meter: &Arc<dyn Meter>,
    fut: Fut,
) -> NodeDelta
where
    Fut: std::future::Future<Output = Result<NodeDelta, PipelineError>>,
{
    let span = ctx.node_span(name);
    let started = Instant::now();
    let outcome = AssertUnwindSafe(fut).catch_unwind().instrument(span).await;
    let elapsed = started.elapsed();
    meter.record_duration("node.duration", name, elapsed);

    match outcome {
        Ok(Ok(delta)) => delta,
        Ok(Err(error)) => {
            tracing::warn!(node = name, code = %error.code, "node failed: {}", error.message);
            NodeDelta::from_error(error)
        },
        Err(_panic) => {
            tracing::error!(node = name, "node panicked");
            NodeDelta::from_error(PipelineError::new(name, ErrorCode::Internal, "node panicked"))
        },
    }
}

/// Parse an LLM completion as JSON, tolerating markdown fences and
/// surrounding prose.
pub(crate) fn parse_structured<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, String> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find(['{', '[']).ok_or_else(|| String::from("no JSON found"))?;
    let end = trimmed.rfind(['}', ']']).ok_or_else(|| String::from("no JSON found"))?;
    if end < start {
        return Err(String::from("no JSON found"));
    }
    serde_json::from_str(&trimmed[start..=end]).map_err(|e| e.to_string())
}

/// LLM gateway failures at ingress are terminal for the request.
pub(crate) fn llm_terminal(node: &'static str, error: PipelineError) -> PipelineError {
    if error.code == ErrorCode::BreakerOpen {
        PipelineError::new(node, ErrorCode::LlmUnavailable, "llm service unavailable")
    } else {
        error
    }
}
