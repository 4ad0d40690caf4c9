//! LLM gateway: named agent configurations behind the LLM breaker.
//!
//! Providers are external; this module owns agent lookup, determinism
//! settings, token accounting, audit records and failure classification.
//! Raw provider error text never leaves this module - callers get codes
//! and generic messages.

mod gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gateway::LlmGateway;

/// Configuration of one named agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    /// Defaults to 0 for reproducible runs.
    #[serde(default)]
    pub temperature: f32,
    /// Fixed when the provider supports it, for the same reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl AgentConfig {
    /// Copy with secret material removed, for `get_llm`/`list_llms`.
    pub fn secret_stripped(&self) -> Self {
        Self { api_key: None, ..self.clone() }
    }
}

/// One completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub seed: Option<u64>,
}

/// One completion.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ChatCompletion {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider failures, classified for the breaker.
///
/// Rate limits, auth failures and bad requests are the caller's problem
/// and are not counted; transient and provider-side failures are.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited,

    #[error("authentication failed")]
    Auth,

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("transient provider failure: {message}")]
    Transient { message: String },

    #[error("provider failure: {message}")]
    Provider { message: String },
}

impl LlmError {
    pub fn is_counted(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Provider { .. })
    }
}

/// A concrete chat model endpoint.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn provider_name(&self) -> &str;
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError>;
}

/// Builds model handles from agent configs; injected by the embedder.
pub trait ChatModelFactory: Send + Sync {
    fn create(&self, config: &AgentConfig) -> parleql_error::Result<std::sync::Arc<dyn ChatModel>>;
}
