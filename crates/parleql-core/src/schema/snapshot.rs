//! Schema snapshot model and deterministic fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::EngineType;

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Engine-reported type name, normalized to lowercase.
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A foreign-key edge out of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// One table with its columns and outgoing foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Authoritative structural description of one datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub datasource_id: String,
    pub engine_type: EngineType,
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Deterministic fingerprint of the structural contents.
    ///
    /// Tables, columns and foreign keys are sorted before hashing, so the
    /// fingerprint is invariant under permutation of the input order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.datasource_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.engine_type.as_str().as_bytes());

        let mut tables: Vec<&TableSchema> = self.tables.iter().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        for table in tables {
            hasher.update([0x1e]);
            hasher.update(table.name.as_bytes());

            let mut columns: Vec<&ColumnSchema> = table.columns.iter().collect();
            columns.sort_by(|a, b| a.name.cmp(&b.name));
            for col in columns {
                hasher.update([0x1f]);
                hasher.update(col.name.as_bytes());
                hasher.update([b':']);
                hasher.update(col.data_type.as_bytes());
                hasher.update([u8::from(col.nullable)]);
            }

            let mut fks: Vec<&ForeignKey> = table.foreign_keys.iter().collect();
            fks.sort_by(|a, b| {
                (&a.column, &a.references_table, &a.references_column)
                    .cmp(&(&b.column, &b.references_table, &b.references_column))
            });
            for fk in fks {
                hasher.update([0x1d]);
                hasher.update(fk.column.as_bytes());
                hasher.update([b'>']);
                hasher.update(fk.references_table.as_bytes());
                hasher.update([b'.']);
                hasher.update(fk.references_column.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str) -> ColumnSchema {
        ColumnSchema {
            name: name.into(),
            data_type: data_type.into(),
            nullable: false,
            description: None,
        }
    }

    fn sample() -> SchemaSnapshot {
        SchemaSnapshot {
            datasource_id: "warehouse".into(),
            engine_type: EngineType::Postgres,
            tables: vec![
                TableSchema {
                    name: "customers".into(),
                    description: None,
                    columns: vec![column("id", "bigint"), column("name", "text")],
                    foreign_keys: vec![],
                },
                TableSchema {
                    name: "sales_orders".into(),
                    description: None,
                    columns: vec![column("id", "bigint"), column("customer_id", "bigint")],
                    foreign_keys: vec![ForeignKey {
                        column: "customer_id".into(),
                        references_table: "customers".into(),
                        references_column: "id".into(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn fingerprint_is_order_invariant() {
        let a = sample();
        let mut b = sample();
        b.tables.reverse();
        for t in &mut b.tables {
            t.columns.reverse();
        }
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = sample();
        let mut b = sample();
        b.tables[0].columns.push(column("email", "text"));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn nullable_flag_is_part_of_fingerprint() {
        let a = sample();
        let mut b = sample();
        b.tables[0].columns[0].nullable = true;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
