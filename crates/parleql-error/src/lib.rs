//! Unified error types for ParleQL runtime crates.
//!
//! All runtime crates depend on this crate for error handling. The central
//! type is [`PipelineError`]: the structured, serializable error carried
//! through pipeline state and surfaced in query results. Infrastructure
//! failures that never enter pipeline state (config parsing, io) use
//! [`EngineError`].

// Error variants and fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

mod code;
mod engine;
mod pipeline;

pub use code::{ErrorCode, Severity};
pub use engine::EngineError;
pub use pipeline::PipelineError;

/// Result type alias for engine-level operations.
pub type Result<T> = std::result::Result<T, EngineError>;
