//! Authoritative schema snapshots and the versioned schema store.
//!
//! Retrieval (the vector gateway) only ever proposes candidate tables; the
//! schema used for planning, validation and SQL generation always comes
//! from here.

mod snapshot;
mod store;

pub use snapshot::{ColumnSchema, ForeignKey, SchemaSnapshot, TableSchema};
pub use store::{FileSchemaStore, MemorySchemaStore, SchemaStore, SchemaVersion};
