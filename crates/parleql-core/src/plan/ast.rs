//! The typed logical AST emitted by the planner.
//!
//! Every column reference names a table (or alias) and column that must
//! resolve against the authoritative schema snapshot; there is no variant
//! for raw SQL fragments. The serde representation doubles as the planner
//! agent's structured-output schema.

use serde::{Deserialize, Serialize};

/// Statement types the engine plans. Only reads today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    Select,
}

/// A table with an optional alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl TableRef {
    /// Name the table is addressed by in expressions.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
}

/// One join clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: TableRef,
    pub kind: JoinKind,
    pub on: Expr,
}

/// Scalar literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarFunc {
    Lower,
    Upper,
    Coalesce,
    Abs,
    Round,
}

impl ScalarFunc {
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Lower => "LOWER",
            Self::Upper => "UPPER",
            Self::Coalesce => "COALESCE",
            Self::Abs => "ABS",
            Self::Round => "ROUND",
        }
    }
}

/// Typed expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Expr {
    Column {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
        name: String,
    },
    Literal {
        #[serde(flatten)]
        value: ScalarValue,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Aggregate call; `arg: None` is `COUNT(*)`.
    Aggregate {
        func: AggFunc,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arg: Option<Box<Expr>>,
        #[serde(default)]
        distinct: bool,
    },
    Function {
        func: ScalarFunc,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Column { table: Some(table.into()), name: name.into() }
    }

    pub fn literal(value: ScalarValue) -> Self {
        Self::Literal { value }
    }

    /// Visit every column reference in the expression tree.
    pub fn visit_columns<'a>(&'a self, visit: &mut impl FnMut(Option<&'a str>, &'a str)) {
        match self {
            Self::Column { table, name } => visit(table.as_deref(), name),
            Self::Literal { .. } => {},
            Self::Binary { left, right, .. } => {
                left.visit_columns(visit);
                right.visit_columns(visit);
            },
            Self::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.visit_columns(visit);
                }
            },
            Self::Function { args, .. } => {
                for arg in args {
                    arg.visit_columns(visit);
                }
            },
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Aggregate { .. } => true,
            Self::Column { .. } | Self::Literal { .. } => false,
            Self::Binary { left, right, .. } => left.contains_aggregate() || right.contains_aggregate(),
            Self::Function { args, .. } => args.iter().any(Expr::contains_aggregate),
        }
    }
}

/// One projected item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectItem {
    pub expr: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl SelectItem {
    /// Output column name: alias, or column name, or a positional name.
    pub fn output_name(&self, position: usize) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            Expr::Column { name, .. } => name.clone(),
            _ => format!("col_{position}"),
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    pub expr: Expr,
    #[serde(default)]
    pub descending: bool,
}

/// The logical plan for one sub-query against one datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanModel {
    pub statement_type: StatementType,
    pub datasource_id: String,
    pub from: TableRef,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    pub select_items: Vec<SelectItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    #[serde(default)]
    pub order_by: Vec<OrderKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl PlanModel {
    /// All table refs, `FROM` first.
    pub fn table_refs(&self) -> Vec<&TableRef> {
        std::iter::once(&self.from)
            .chain(self.joins.iter().map(|j| &j.table))
            .collect()
    }

    /// Every column reference in the plan, as (binding, column).
    pub fn referenced_columns(&self) -> Vec<(Option<String>, String)> {
        let mut out = Vec::new();
        let mut visit = |table: Option<&str>, name: &str| {
            out.push((table.map(ToString::to_string), name.to_string()));
        };
        for item in &self.select_items {
            item.expr.visit_columns(&mut visit);
        }
        for join in &self.joins {
            join.on.visit_columns(&mut visit);
        }
        if let Some(filter) = &self.filter {
            filter.visit_columns(&mut visit);
        }
        for expr in &self.group_by {
            expr.visit_columns(&mut visit);
        }
        for key in &self.order_by {
            key.expr.visit_columns(&mut visit);
        }
        out
    }

    /// Output column names in projection order.
    pub fn output_columns(&self) -> Vec<String> {
        self.select_items
            .iter()
            .enumerate()
            .map(|(i, item)| item.output_name(i))
            .collect()
    }
}
