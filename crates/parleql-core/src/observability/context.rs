//! Request-scoped correlation context.

use serde::{Deserialize, Serialize};

use crate::security::UserContext;

/// Correlation data propagated into every stage, log record and audit line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub trace_id: String,
    pub tenant_id: String,
    pub role: String,
}

impl RequestContext {
    pub fn new(trace_id: impl Into<String>, tenant_id: impl Into<String>, user: &UserContext) -> Self {
        Self {
            trace_id: trace_id.into(),
            tenant_id: tenant_id.into(),
            role: user.roles.first().cloned().unwrap_or_default(),
        }
    }

    /// A span for one pipeline node, carrying the correlation fields.
    pub fn node_span(&self, node: &'static str) -> tracing::Span {
        tracing::info_span!(
            "pipeline_node",
            node,
            trace_id = %self.trace_id,
            tenant_id = %self.tenant_id,
        )
    }
}
