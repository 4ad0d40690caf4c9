//! Logical validation: schema resolution, alias consistency, RBAC.

use std::collections::{BTreeMap, BTreeSet};

use parleql_error::{ErrorCode, PipelineError};

use crate::plan::{BinaryOp, Expr, PlanModel, ScalarValue};
use crate::schema::{SchemaSnapshot, TableSchema};
use crate::security::{PolicySet, UserContext};

pub const NODE: &str = "logical_validator";

fn fail(sub_query_id: &str, message: String) -> PipelineError {
    PipelineError::new(NODE, ErrorCode::LogicalValidationFailed, message).for_sub_query(sub_query_id)
}

fn numeric_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "int" | "integer" | "bigint" | "smallint" | "float" | "double" | "real" | "numeric" | "decimal"
    )
}

/// Validate `plan` against the authoritative snapshot and the role policy.
///
/// Returns advisory warnings on success. Security misses are fatal; every
/// other finding is `LOGICAL_VALIDATION_FAILED` and feeds the refiner.
pub fn validate(
    plan: &PlanModel,
    snapshot: &SchemaSnapshot,
    policies: &PolicySet,
    user: &UserContext,
    strict_columns: bool,
    sub_query_id: &str,
) -> Result<Vec<String>, PipelineError> {
    let mut warnings = Vec::new();

    // Tables exist, and the user may touch them. RBAC is checked for every
    // referenced table before anything else leaks into an error message.
    let mut bindings: BTreeMap<&str, &TableSchema> = BTreeMap::new();
    for table_ref in plan.table_refs() {
        let Some(table) = snapshot.table(&table_ref.table) else {
            return Err(fail(
                sub_query_id,
                format!("unknown table '{}' on datasource '{}'", table_ref.table, plan.datasource_id),
            ));
        };
        if !policies.check(user, &plan.datasource_id, &table_ref.table) {
            return Err(PipelineError::new(
                NODE,
                ErrorCode::SecurityViolation,
                format!("access to table '{}.{}' is denied", plan.datasource_id, table_ref.table),
            )
            .for_sub_query(sub_query_id));
        }
        let binding = table_ref.binding();
        if bindings.insert(binding, table).is_some() {
            return Err(fail(sub_query_id, format!("duplicate table binding '{binding}'")));
        }
    }

    // Select aliases are legal targets for ORDER BY / GROUP BY references.
    let select_aliases: BTreeSet<&str> = plan
        .select_items
        .iter()
        .filter_map(|item| item.alias.as_deref())
        .collect();

    for (qualifier, column) in plan.referenced_columns() {
        match qualifier {
            Some(qualifier) => {
                let Some(table) = bindings.get(qualifier.as_str()) else {
                    return Err(fail(sub_query_id, format!("unknown table binding '{qualifier}'")));
                };
                if table.column(&column).is_none() {
                    return Err(fail(
                        sub_query_id,
                        format!("unknown column '{qualifier}.{column}'"),
                    ));
                }
            },
            None => {
                if select_aliases.contains(column.as_str()) {
                    continue;
                }
                let matches = bindings.values().filter(|t| t.column(&column).is_some()).count();
                match matches {
                    1 => {},
                    0 if strict_columns => {
                        return Err(fail(sub_query_id, format!("unknown column '{column}'")));
                    },
                    0 => warnings.push(format!("column '{column}' could not be resolved")),
                    _ if strict_columns => {
                        return Err(fail(
                            sub_query_id,
                            format!("ambiguous column '{column}'; qualify it with a table"),
                        ));
                    },
                    _ => warnings.push(format!("column '{column}' is ambiguous")),
                }
            },
        }
    }

    // Light type discipline on comparisons against literals.
    if let Some(filter) = &plan.filter {
        check_literal_comparisons(filter, &bindings, &mut warnings);
    }
    for join in &plan.joins {
        check_literal_comparisons(&join.on, &bindings, &mut warnings);
    }

    Ok(warnings)
}

fn check_literal_comparisons(
    expr: &Expr,
    bindings: &BTreeMap<&str, &TableSchema>,
    warnings: &mut Vec<String>,
) {
    if let Expr::Binary { op, left, right } = expr {
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            check_literal_comparisons(left, bindings, warnings);
            check_literal_comparisons(right, bindings, warnings);
            return;
        }
        if let (Expr::Column { table: Some(table), name }, Expr::Literal { value }) =
            (left.as_ref(), right.as_ref())
        {
            if let Some(schema) = bindings.get(table.as_str()) {
                if let Some(column) = schema.column(name) {
                    if numeric_type(&column.data_type) && matches!(value, ScalarValue::Text(_)) {
                        warnings.push(format!(
                            "comparing numeric column '{table}.{name}' against a text literal"
                        ));
                    }
                }
            }
        }
    }
}
