//! The structured error carried through pipeline state.

use serde::{Deserialize, Serialize};

use crate::code::{ErrorCode, Severity};

/// A single pipeline failure, appended to `PipelineState.errors`.
///
/// The `errors` list is append-only: nodes add to it, nothing rewrites it.
/// Messages are sanitized at construction sites; raw external error text
/// (driver messages, provider payloads) must not be stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    /// Name of the node that produced the error.
    pub node: String,
    /// Typed error code.
    pub code: ErrorCode,
    /// Sanitized human-readable message.
    pub message: String,
    /// Severity, derived from the code at construction.
    pub severity: Severity,
    /// Whether the refiner loop may retry, derived from the code.
    pub retryable: bool,
    /// Sub-query the error belongs to, when node ran inside an agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_query_id: Option<String>,
}

impl PipelineError {
    /// Build an error for `node` with severity and retryability derived
    /// from `code`.
    pub fn new(node: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            code,
            message: message.into(),
            severity: code.severity(),
            retryable: code.is_retryable(),
            sub_query_id: None,
        }
    }

    /// Tag the error with the owning sub-query.
    #[must_use]
    pub fn for_sub_query(mut self, id: impl Into<String>) -> Self {
        self.sub_query_id = Some(id.into());
        self
    }

    /// Downgrade to warning severity (used when an exhausted attempt was
    /// later recovered by the refiner loop).
    #[must_use]
    pub fn into_warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    /// Escalate to fatal (terminates the owner regardless of the code's
    /// default severity).
    #[must_use]
    pub fn into_fatal(mut self) -> Self {
        self.severity = Severity::Fatal;
        self.retryable = false;
        self
    }

    /// True when the error terminates its owner immediately.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} ({}): {}", self.severity, self.code, self.node, self.message)
    }
}

impl std::error::Error for PipelineError {}
