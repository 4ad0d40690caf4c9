//! Result artifacts: typed columnar frames and their tenant-scoped store.
//!
//! Frames carry sub-query results between the executor and the aggregator.
//! The object behind a ref never mutates; delete/expire is out-of-band.

mod frame;
mod store;

pub use frame::{Column, DType, ResultFrame};
pub use store::{ArtifactMeta, ArtifactStore, LocalFsArtifactStore, ResultArtifactRef};
