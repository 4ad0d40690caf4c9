//! Dialect-aware SQL generation from the logical plan.
//!
//! The generator only renders; it never executes. Dialect differences are
//! driven by the adapter's capability flags (identifier quoting, boolean
//! literals, `TOP` vs `LIMIT`).

use parleql_error::{ErrorCode, PipelineError};

use crate::db::{AdapterCapabilities, EngineType};
use crate::plan::{BinaryOp, Expr, JoinKind, PlanModel, ScalarValue};

const NODE: &str = "generator";

/// Render `plan` as a single SELECT statement for the adapter's dialect.
pub fn generate_sql(plan: &PlanModel, caps: &AdapterCapabilities) -> Result<String, PipelineError> {
    if plan.select_items.is_empty() {
        return Err(PipelineError::new(NODE, ErrorCode::MissingSql, "plan has no select items"));
    }

    let dialect = caps.dialect;
    let mut sql = String::from("SELECT ");

    // SQL Server pagination: TOP n directly after SELECT.
    if !caps.supports_limit_offset {
        if let Some(limit) = plan.limit {
            sql.push_str(&format!("TOP {limit} "));
        }
    }

    let items: Vec<String> = plan
        .select_items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let rendered = render_expr(&item.expr, dialect);
            match &item.alias {
                Some(alias) => format!("{rendered} AS {}", quote_ident(alias, dialect)),
                None if matches!(item.expr, Expr::Column { .. }) => rendered,
                None => format!("{rendered} AS {}", quote_ident(&item.output_name(i), dialect)),
            }
        })
        .collect();
    sql.push_str(&items.join(", "));

    sql.push_str(" FROM ");
    sql.push_str(&render_table(&plan.from.table, plan.from.alias.as_deref(), dialect));

    for join in &plan.joins {
        let keyword = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        sql.push_str(&format!(
            " {keyword} {} ON {}",
            render_table(&join.table.table, join.table.alias.as_deref(), dialect),
            render_expr(&join.on, dialect),
        ));
    }

    if let Some(filter) = &plan.filter {
        sql.push_str(" WHERE ");
        sql.push_str(&render_expr(filter, dialect));
    }

    if !plan.group_by.is_empty() {
        let keys: Vec<String> = plan.group_by.iter().map(|e| render_expr(e, dialect)).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&keys.join(", "));
    }

    if !plan.order_by.is_empty() {
        let keys: Vec<String> = plan
            .order_by
            .iter()
            .map(|key| {
                let direction = if key.descending { "DESC" } else { "ASC" };
                format!("{} {direction}", render_expr(&key.expr, dialect))
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    if caps.supports_limit_offset {
        if let Some(limit) = plan.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
    }

    Ok(sql)
}

fn quote_ident(name: &str, dialect: EngineType) -> String {
    match dialect {
        EngineType::Postgres | EngineType::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        EngineType::Mysql => format!("`{}`", name.replace('`', "``")),
        EngineType::Sqlserver => format!("[{}]", name.replace(']', "]]")),
    }
}

fn render_table(table: &str, alias: Option<&str>, dialect: EngineType) -> String {
    match alias {
        Some(alias) => format!("{} AS {}", quote_ident(table, dialect), quote_ident(alias, dialect)),
        None => quote_ident(table, dialect),
    }
}

fn render_literal(value: &ScalarValue, dialect: EngineType) -> String {
    match value {
        ScalarValue::Null => String::from("NULL"),
        ScalarValue::Bool(b) => match dialect {
            // No boolean literals in TDS.
            EngineType::Sqlserver => String::from(if *b { "1" } else { "0" }),
            _ => String::from(if *b { "TRUE" } else { "FALSE" }),
        },
        ScalarValue::Int(i) => i.to_string(),
        ScalarValue::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        },
        ScalarValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn op_token(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::NotEq => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Like => "LIKE",
    }
}

fn render_expr(expr: &Expr, dialect: EngineType) -> String {
    match expr {
        Expr::Column { table, name } => match table {
            Some(table) => format!("{}.{}", quote_ident(table, dialect), quote_ident(name, dialect)),
            None => quote_ident(name, dialect),
        },
        Expr::Literal { value } => render_literal(value, dialect),
        Expr::Binary { op, left, right } => {
            let left = render_expr(left, dialect);
            let right = render_expr(right, dialect);
            match op {
                // Logical connectives get parens so nesting stays unambiguous.
                BinaryOp::And | BinaryOp::Or => format!("({left} {} {right})", op_token(*op)),
                _ => format!("{left} {} {right}", op_token(*op)),
            }
        },
        Expr::Aggregate { func, arg, distinct } => {
            let inner = match arg {
                None => String::from("*"),
                Some(arg) => {
                    let rendered = render_expr(arg, dialect);
                    if *distinct {
                        format!("DISTINCT {rendered}")
                    } else {
                        rendered
                    }
                },
            };
            format!("{}({inner})", func.sql_name())
        },
        Expr::Function { func, args } => {
            let args: Vec<String> = args.iter().map(|a| render_expr(a, dialect)).collect();
            format!("{}({})", func.sql_name(), args.join(", "))
        },
    }
}
