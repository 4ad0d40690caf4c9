//! Typed columnar result frame.
//!
//! Column-major storage: each column owns its value vector, and every
//! column has the same length. The aggregator's relational operators work
//! directly on this layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::QueryRows;

/// Column data types. Values are stored as JSON scalars; the dtype records
/// the dominant type for dialect-aware rendering and sort semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int,
    Float,
    Text,
    Json,
}

impl DType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Bool),
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Some(Self::Int)
                } else {
                    Some(Self::Float)
                }
            },
            Value::String(_) => Some(Self::Text),
            Value::Array(_) | Value::Object(_) => Some(Self::Json),
        }
    }
}

/// One named column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: DType,
    pub values: Vec<Value>,
}

/// A columnar result frame. Invariant: every column has `num_rows` values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    pub num_rows: usize,
    pub columns: Vec<Column>,
}

impl ResultFrame {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a frame with the given column names and row-major rows.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let num_rows = rows.len();
        let mut value_columns: Vec<Vec<Value>> = columns.iter().map(|_| Vec::with_capacity(num_rows)).collect();
        for mut row in rows {
            // Ragged rows are padded with nulls rather than dropped.
            row.resize(columns.len(), Value::Null);
            for (idx, value) in row.into_iter().enumerate() {
                value_columns[idx].push(value);
            }
        }
        let columns = columns
            .into_iter()
            .zip(value_columns)
            .map(|(name, values)| {
                let dtype = values.iter().find_map(DType::of).unwrap_or(DType::Text);
                Column { name, dtype, values }
            })
            .collect();
        Self { num_rows, columns }
    }

    pub fn from_query_rows(rows: QueryRows) -> Self {
        Self::from_rows(rows.columns, rows.rows)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Value at (column index, row index); `Null` when out of range.
    pub fn value_at(&self, column: usize, row: usize) -> &Value {
        self.columns
            .get(column)
            .and_then(|c| c.values.get(row))
            .unwrap_or(&Value::Null)
    }

    /// One row as an ordered (column, value) object.
    pub fn row_object(&self, row: usize) -> serde_json::Map<String, Value> {
        let mut object = serde_json::Map::new();
        for column in &self.columns {
            object.insert(
                column.name.clone(),
                column.values.get(row).cloned().unwrap_or(Value::Null),
            );
        }
        object
    }

    /// All rows as JSON objects (row-major view for the HTTP surface).
    pub fn to_rows(&self) -> Vec<Value> {
        (0..self.num_rows).map(|r| Value::Object(self.row_object(r))).collect()
    }

    /// Keep only the rows at `indices`, in the given order.
    pub fn take(&self, indices: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                dtype: c.dtype,
                values: indices
                    .iter()
                    .map(|&i| c.values.get(i).cloned().unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();
        Self { num_rows: indices.len(), columns }
    }
}
