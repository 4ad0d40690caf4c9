//! Infrastructure errors that never enter pipeline state.

use thiserror::Error;

use crate::pipeline::PipelineError;

/// Errors raised by engine plumbing: configuration, stores, registries.
///
/// `run_query` never returns these; they are converted to `PipelineError`
/// entries at the facade boundary. Management operations (`add_datasource`,
/// `configure_llm`, ...) surface them directly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config file error: {message}")]
    ConfigFile { message: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Convenience constructor for configuration failures.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Convenience constructor for lookup failures.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Convenience constructor for internal invariant breaks.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}
