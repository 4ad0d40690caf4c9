//! Agent registry and breaker-wrapped invocation.

use std::sync::Arc;

use dashmap::DashMap;
use parleql_error::{EngineError, ErrorCode, PipelineError, Result};

use crate::observability::{AuditHandle, AuditRecord, Meter, RequestContext};
use crate::resilience::{with_cancellation, CallOutcome, CancellationToken, CircuitBreaker};

use super::{AgentConfig, ChatCompletion, ChatModel, ChatModelFactory, ChatRequest, LlmError};

struct AgentEntry {
    config: AgentConfig,
    model: Arc<dyn ChatModel>,
}

/// Named-agent gateway. All pipeline LLM calls go through [`invoke`].
///
/// [`invoke`]: LlmGateway::invoke
pub struct LlmGateway {
    factory: Arc<dyn ChatModelFactory>,
    agents: DashMap<String, AgentEntry>,
    breaker: Arc<CircuitBreaker>,
    audit: AuditHandle,
    meter: Arc<dyn Meter>,
}

impl LlmGateway {
    pub fn new(
        factory: Arc<dyn ChatModelFactory>,
        breaker: Arc<CircuitBreaker>,
        audit: AuditHandle,
        meter: Arc<dyn Meter>,
    ) -> Self {
        Self { factory, agents: DashMap::new(), breaker, audit, meter }
    }

    /// Register (or replace) a named agent.
    pub fn configure(&self, name: impl Into<String>, config: AgentConfig) -> Result<()> {
        let name = name.into();
        if config.model.is_empty() {
            return Err(EngineError::config(format!("agent '{name}' has no model")));
        }
        let model = self.factory.create(&config)?;
        self.agents.insert(name, AgentEntry { config, model });
        Ok(())
    }

    /// Secret-stripped config for one agent.
    pub fn get(&self, name: &str) -> Option<AgentConfig> {
        self.agents.get(name).map(|e| e.config.secret_stripped())
    }

    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// All agents, secret-stripped, sorted by name.
    pub fn list(&self) -> Vec<(String, AgentConfig)> {
        let mut agents: Vec<(String, AgentConfig)> = self
            .agents
            .iter()
            .map(|e| (e.key().clone(), e.value().config.secret_stripped()))
            .collect();
        agents.sort_by(|a, b| a.0.cmp(&b.0));
        agents
    }

    pub fn is_configured(&self) -> bool {
        !self.agents.is_empty()
    }

    /// Invoke `agent` (falling back to `default`) for pipeline node `node`.
    ///
    /// Wraps the call in the LLM breaker, counts tokens, and writes a
    /// sanitized audit record. Provider error text is mapped to codes and
    /// never returned to the caller.
    pub async fn invoke(
        &self,
        agent: &str,
        node: &'static str,
        ctx: &RequestContext,
        system: String,
        user: String,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChatCompletion, PipelineError> {
        let entry = self
            .agents
            .get(agent)
            .or_else(|| self.agents.get("default"))
            .ok_or_else(|| {
                PipelineError::new(node, ErrorCode::LlmUnavailable, "no LLM agent configured")
            })?;
        let config = entry.config.clone();
        let model = Arc::clone(&entry.model);
        drop(entry);

        let Some(permit) = self.breaker.try_acquire().await else {
            return Err(PipelineError::new(node, ErrorCode::BreakerOpen, "llm breaker is open"));
        };

        let request = ChatRequest {
            system,
            user,
            temperature: config.temperature,
            seed: config.seed,
        };
        let audit_prompt = format!("{}\n---\n{}", request.system, request.user);

        let outcome = with_cancellation(cancel, model.complete(request)).await;
        match outcome {
            None => {
                self.breaker.record(permit, CallOutcome::Ignored).await;
                Err(PipelineError::new(node, ErrorCode::Cancelled, "request cancelled"))
            },
            Some(Ok(completion)) => {
                self.breaker.record(permit, CallOutcome::Success).await;
                self.meter.incr_counter("token.usage", agent, completion.total_tokens());
                self.audit.record(AuditRecord::llm_interaction(
                    &ctx.trace_id,
                    node,
                    &config.model,
                    &audit_prompt,
                    &completion.text,
                    completion.total_tokens(),
                ));
                Ok(completion)
            },
            Some(Err(error)) => {
                let counted = error.is_counted();
                self.breaker
                    .record(permit, if counted { CallOutcome::Failure } else { CallOutcome::Ignored })
                    .await;
                tracing::warn!(node, agent, %error, "llm invocation failed");
                // Only the classification crosses this boundary.
                let message = match error {
                    LlmError::RateLimited => "llm rate limited",
                    LlmError::Auth => "llm authentication failed",
                    LlmError::BadRequest { .. } => "llm rejected the request",
                    LlmError::Transient { .. } | LlmError::Provider { .. } => "llm provider failure",
                };
                Err(PipelineError::new(node, ErrorCode::LlmUnavailable, message))
            },
        }
    }
}
