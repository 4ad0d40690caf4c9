//! Chunk building from schema snapshots and curated examples.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::schema::SchemaSnapshot;

/// What a chunk describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Table,
    Column,
    Example,
    Description,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Column => "column",
            Self::Example => "example",
            Self::Description => "description",
        }
    }
}

/// A curated natural-language example attached to a datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CuratedExample {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Tables the example touches, used as a routing signal.
    #[serde(default)]
    pub tables: Vec<String>,
}

/// One retrievable unit in the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id: hash of kind + identifying content, so re-indexing
    /// overwrites rather than duplicates.
    pub stable_id: String,
    pub kind: ChunkKind,
    pub datasource_id: String,
    pub schema_version: String,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn stable_id(kind: ChunkKind, datasource_id: &str, ident: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(datasource_id.as_bytes());
    hasher.update([0]);
    hasher.update(ident.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Build the chunk set for one snapshot version.
pub fn build_chunks(
    snapshot: &SchemaSnapshot,
    schema_version: &str,
    description: Option<&str>,
    examples: &[CuratedExample],
) -> Vec<Chunk> {
    let ds = &snapshot.datasource_id;
    let mut chunks = Vec::new();

    if let Some(text) = description {
        if !text.is_empty() {
            chunks.push(Chunk {
                stable_id: stable_id(ChunkKind::Description, ds, "datasource"),
                kind: ChunkKind::Description,
                datasource_id: ds.clone(),
                schema_version: schema_version.to_string(),
                text: text.to_string(),
                metadata: BTreeMap::new(),
            });
        }
    }

    for table in &snapshot.tables {
        let column_list = table
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut text = format!("table {}: columns {}", table.name, column_list);
        if let Some(desc) = &table.description {
            text.push_str(". ");
            text.push_str(desc);
        }
        chunks.push(Chunk {
            stable_id: stable_id(ChunkKind::Table, ds, &table.name),
            kind: ChunkKind::Table,
            datasource_id: ds.clone(),
            schema_version: schema_version.to_string(),
            text,
            metadata: BTreeMap::from([("table".to_string(), table.name.clone())]),
        });

        for column in &table.columns {
            let mut text = format!("column {}.{} ({})", table.name, column.name, column.data_type);
            if let Some(desc) = &column.description {
                text.push_str(": ");
                text.push_str(desc);
            }
            chunks.push(Chunk {
                stable_id: stable_id(ChunkKind::Column, ds, &format!("{}.{}", table.name, column.name)),
                kind: ChunkKind::Column,
                datasource_id: ds.clone(),
                schema_version: schema_version.to_string(),
                text,
                metadata: BTreeMap::from([
                    ("table".to_string(), table.name.clone()),
                    ("column".to_string(), column.name.clone()),
                ]),
            });
        }
    }

    for example in examples {
        let mut text = format!("example: {}", example.question);
        if let Some(sql) = &example.sql {
            text.push_str(" | sql: ");
            text.push_str(sql);
        }
        let mut metadata = BTreeMap::from([("question".to_string(), example.question.clone())]);
        if !example.tables.is_empty() {
            metadata.insert("tables".to_string(), example.tables.join(","));
        }
        chunks.push(Chunk {
            stable_id: stable_id(ChunkKind::Example, ds, &example.question),
            kind: ChunkKind::Example,
            datasource_id: ds.clone(),
            schema_version: schema_version.to_string(),
            text,
            metadata,
        });
    }

    chunks
}
