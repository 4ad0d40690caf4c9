//! Trace context, metrics and the audit log.
//!
//! Every request gets a `trace_id` at ingress; the [`RequestContext`] rides
//! through every stage and is stamped on every span, metric label and audit
//! record emitted for that request.

mod audit;
mod context;
mod meter;

pub use audit::{AuditHandle, AuditLog, AuditRecord};
pub use context::RequestContext;
pub use meter::{MemoryMeter, Meter, TracingMeter};
