//! Datasource adapter contract and registry.
//!
//! Concrete drivers live outside this crate; everything here speaks to them
//! through [`DatasourceAdapter`]. The registry is the process-wide lookup
//! table, safe for hot-add at any time.

mod registry;
mod traits;
mod types;

pub use registry::{AdapterHandle, AdapterRegistry};
pub use traits::{AdapterError, AdapterFactory, DatasourceAdapter};
pub use types::{AdapterCapabilities, DryRunReport, EngineType, ExecLimits, QueryRows};
