//! Error codes and severities.
//!
//! Every failure that crosses a pipeline-node boundary is tagged with an
//! [`ErrorCode`]. Severity and retryability are pure functions of the code,
//! so classification decisions live in one place.

use serde::{Deserialize, Serialize};

/// Severity of a pipeline error.
///
/// - `Warning`: degraded but answerable; the request continues.
/// - `Error`: the owning node failed; recoverable through the refiner loop.
/// - `Fatal`: terminates the owning sub-query (and, if the sub-query is
///   required by the result plan, the whole request).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Typed error codes for pipeline failures.
///
/// Serialized in SCREAMING_SNAKE_CASE on every external surface; only the
/// code and a sanitized message ever cross the LLM or HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingSql,
    ExecutionFailed,
    DryRunFailed,
    LogicalValidationFailed,
    SecurityViolation,
    IntentRejected,
    PipelineTimeout,
    SchemaVersionMismatch,
    BreakerOpen,
    SandboxCrash,
    AdapterUnavailable,
    Configuration,
    NotFound,
    LlmUnavailable,
    VectorUnavailable,
    ArtifactIo,
    Cancelled,
    Internal,
}

impl ErrorCode {
    /// Stable wire name of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingSql => "MISSING_SQL",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::DryRunFailed => "DRY_RUN_FAILED",
            Self::LogicalValidationFailed => "LOGICAL_VALIDATION_FAILED",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::IntentRejected => "INTENT_REJECTED",
            Self::PipelineTimeout => "PIPELINE_TIMEOUT",
            Self::SchemaVersionMismatch => "SCHEMA_VERSION_MISMATCH",
            Self::BreakerOpen => "BREAKER_OPEN",
            Self::SandboxCrash => "SANDBOX_CRASH",
            Self::AdapterUnavailable => "ADAPTER_UNAVAILABLE",
            Self::Configuration => "CONFIGURATION",
            Self::NotFound => "NOT_FOUND",
            Self::LlmUnavailable => "LLM_UNAVAILABLE",
            Self::VectorUnavailable => "VECTOR_UNAVAILABLE",
            Self::ArtifactIo => "ARTIFACT_IO",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Default severity for the code.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::SecurityViolation
            | Self::IntentRejected
            | Self::PipelineTimeout
            | Self::SchemaVersionMismatch
            | Self::LlmUnavailable
            | Self::Cancelled => Severity::Fatal,
            Self::VectorUnavailable => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Whether the refiner loop may retry after this code.
    ///
    /// Retryability is a function of (severity, code): fatal codes never
    /// retry, and a handful of error-severity codes are structural enough
    /// that another planning attempt cannot fix them.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        if self.severity() == Severity::Fatal {
            return false;
        }
        !matches!(
            self,
            Self::BreakerOpen
                | Self::AdapterUnavailable
                | Self::Configuration
                | Self::NotFound
                | Self::ArtifactIo
                | Self::VectorUnavailable
                | Self::Internal
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_are_never_retryable() {
        for code in [
            ErrorCode::SecurityViolation,
            ErrorCode::IntentRejected,
            ErrorCode::PipelineTimeout,
            ErrorCode::LlmUnavailable,
            ErrorCode::Cancelled,
        ] {
            assert_eq!(code.severity(), Severity::Fatal);
            assert!(!code.is_retryable(), "{code} must not be retryable");
        }
    }

    #[test]
    fn refiner_codes_are_retryable() {
        assert!(ErrorCode::DryRunFailed.is_retryable());
        assert!(ErrorCode::LogicalValidationFailed.is_retryable());
        assert!(ErrorCode::ExecutionFailed.is_retryable());
        assert!(ErrorCode::MissingSql.is_retryable());
    }

    #[test]
    fn breaker_open_fails_fast() {
        assert!(!ErrorCode::BreakerOpen.is_retryable());
    }

    #[test]
    fn wire_names_are_screaming_snake() {
        assert_eq!(ErrorCode::DryRunFailed.as_str(), "DRY_RUN_FAILED");
        let json = serde_json::to_string(&ErrorCode::SecurityViolation).unwrap();
        assert_eq!(json, "\"SECURITY_VIOLATION\"");
    }
}
