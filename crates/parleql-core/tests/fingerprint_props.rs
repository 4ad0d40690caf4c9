//! Property: schema fingerprints are invariant under input permutation.

use parleql_core::db::EngineType;
use parleql_core::schema::{ColumnSchema, ForeignKey, SchemaSnapshot, TableSchema};
use proptest::prelude::*;

const TABLES: usize = 6;
const COLUMNS: usize = 4;

fn table(index: usize) -> TableSchema {
    TableSchema {
        name: format!("table_{index}"),
        description: None,
        columns: (0..COLUMNS)
            .map(|c| ColumnSchema {
                name: format!("col_{c}"),
                data_type: if c % 2 == 0 { "bigint".into() } else { "text".into() },
                nullable: c % 3 == 0,
                description: None,
            })
            .collect(),
        foreign_keys: if index > 0 {
            vec![ForeignKey {
                column: "col_0".into(),
                references_table: format!("table_{}", index - 1),
                references_column: "col_0".into(),
            }]
        } else {
            vec![]
        },
    }
}

fn snapshot() -> SchemaSnapshot {
    SchemaSnapshot {
        datasource_id: "prop".into(),
        engine_type: EngineType::Postgres,
        tables: (0..TABLES).map(table).collect(),
    }
}

fn permutation(n: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..n).collect::<Vec<usize>>()).prop_shuffle()
}

proptest! {
    #[test]
    fn fingerprint_ignores_permutation(
        table_order in permutation(TABLES),
        column_order in permutation(COLUMNS),
    ) {
        let base = snapshot();
        let expected = base.fingerprint();

        let mut shuffled = base.clone();
        shuffled.tables = table_order.iter().map(|&i| base.tables[i].clone()).collect();
        for t in &mut shuffled.tables {
            let original = t.columns.clone();
            t.columns = column_order.iter().map(|&i| original[i].clone()).collect();
        }

        prop_assert_eq!(shuffled.fingerprint(), expected);
    }
}
