//! In-process relational evaluator for result plans.
//!
//! Pure code over columnar frames: the aggregation path never calls an
//! LLM and never interprets SQL text.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use parleql_error::{ErrorCode, PipelineError};
use serde_json::Value;

use crate::artifact::{Column, DType, ResultFrame};

use super::ast::{JoinKind, ScalarValue};
use super::result_plan::{AggOp, AggregateSpec, CompareOp, ResultPlan, ResultPlanNode, SortKey};

const NODE: &str = "aggregator";

fn err(message: impl Into<String>) -> PipelineError {
    PipelineError::new(NODE, ErrorCode::ExecutionFailed, message)
}

/// Execute `plan` over the named sub-query frames.
pub fn evaluate(
    plan: &ResultPlan,
    inputs: &BTreeMap<String, ResultFrame>,
) -> Result<ResultFrame, PipelineError> {
    eval_node(&plan.root, inputs)
}

fn eval_node(
    node: &ResultPlanNode,
    inputs: &BTreeMap<String, ResultFrame>,
) -> Result<ResultFrame, PipelineError> {
    match node {
        ResultPlanNode::Scan { sub_query } => inputs
            .get(sub_query)
            .cloned()
            .ok_or_else(|| err(format!("missing result for sub-query '{sub_query}'"))),
        ResultPlanNode::Project { input, columns } => project(eval_node(input, inputs)?, columns),
        ResultPlanNode::Filter { input, column, compare, value } => {
            filter(eval_node(input, inputs)?, column, *compare, value)
        },
        ResultPlanNode::Join { left, right, kind, on } => {
            join(eval_node(left, inputs)?, eval_node(right, inputs)?, *kind, on)
        },
        ResultPlanNode::Union { inputs: parts } => {
            let frames = parts
                .iter()
                .map(|p| eval_node(p, inputs))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(union(frames))
        },
        ResultPlanNode::Aggregate { input, group_by, aggregates } => {
            aggregate(eval_node(input, inputs)?, group_by, aggregates)
        },
        ResultPlanNode::OrderLimit { input, order_by, limit } => {
            order_limit(eval_node(input, inputs)?, order_by, *limit)
        },
    }
}

fn scalar_to_value(scalar: &ScalarValue) -> Value {
    match scalar {
        ScalarValue::Null => Value::Null,
        ScalarValue::Bool(b) => Value::Bool(*b),
        ScalarValue::Int(i) => Value::from(*i),
        ScalarValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        ScalarValue::Text(s) => Value::String(s.clone()),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Total order over JSON scalars: null < bool < number < string < other.
/// Numbers compare numerically; everything else by its JSON text.
pub(crate) fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (as_f64(a).unwrap_or(f64::NAN), as_f64(b).unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn project(frame: ResultFrame, columns: &[String]) -> Result<ResultFrame, PipelineError> {
    let picked = columns
        .iter()
        .map(|name| {
            frame
                .column(name)
                .cloned()
                .ok_or_else(|| err(format!("projection references unknown column '{name}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResultFrame { num_rows: frame.num_rows, columns: picked })
}

fn filter(
    frame: ResultFrame,
    column: &str,
    compare: CompareOp,
    value: &ScalarValue,
) -> Result<ResultFrame, PipelineError> {
    let idx = frame
        .column_index(column)
        .ok_or_else(|| err(format!("filter references unknown column '{column}'")))?;
    let target = scalar_to_value(value);
    let keep: Vec<usize> = (0..frame.num_rows)
        .filter(|&row| {
            let ordering = cmp_values(frame.value_at(idx, row), &target);
            match compare {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::NotEq => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtEq => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::GtEq => ordering != Ordering::Less,
            }
        })
        .collect();
    Ok(frame.take(&keep))
}

fn join_key(frame: &ResultFrame, columns: &[usize], row: usize) -> String {
    let key: Vec<&Value> = columns.iter().map(|&c| frame.value_at(c, row)).collect();
    serde_json::to_string(&key).unwrap_or_default()
}

fn join(
    left: ResultFrame,
    right: ResultFrame,
    kind: JoinKind,
    on: &[(String, String)],
) -> Result<ResultFrame, PipelineError> {
    let left_keys = on
        .iter()
        .map(|(l, _)| {
            left.column_index(l)
                .ok_or_else(|| err(format!("join references unknown left column '{l}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let right_keys = on
        .iter()
        .map(|(_, r)| {
            right
                .column_index(r)
                .ok_or_else(|| err(format!("join references unknown right column '{r}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut right_index: HashMap<String, Vec<usize>> = HashMap::new();
    for row in 0..right.num_rows {
        right_index
            .entry(join_key(&right, &right_keys, row))
            .or_default()
            .push(row);
    }

    // Output schema: left columns, then right columns with clashes suffixed.
    let left_names: Vec<String> = left.columns.iter().map(|c| c.name.clone()).collect();
    let right_names: Vec<String> = right
        .columns
        .iter()
        .map(|c| {
            if left_names.contains(&c.name) {
                format!("{}_r", c.name)
            } else {
                c.name.clone()
            }
        })
        .collect();

    let mut pairs: Vec<(usize, Option<usize>)> = Vec::new();
    for row in 0..left.num_rows {
        match right_index.get(&join_key(&left, &left_keys, row)) {
            Some(matches) => {
                for &r in matches {
                    pairs.push((row, Some(r)));
                }
            },
            None => {
                if kind == JoinKind::Left {
                    pairs.push((row, None));
                }
            },
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(left.columns.len() + right.columns.len());
    for (ci, col) in left.columns.iter().enumerate() {
        columns.push(Column {
            name: col.name.clone(),
            dtype: col.dtype,
            values: pairs.iter().map(|&(l, _)| left.value_at(ci, l).clone()).collect(),
        });
    }
    for (ci, col) in right.columns.iter().enumerate() {
        columns.push(Column {
            name: right_names[ci].clone(),
            dtype: col.dtype,
            values: pairs
                .iter()
                .map(|&(_, r)| r.map_or(Value::Null, |row| right.value_at(ci, row).clone()))
                .collect(),
        });
    }
    Ok(ResultFrame { num_rows: pairs.len(), columns })
}

fn union(frames: Vec<ResultFrame>) -> ResultFrame {
    // Output columns: union of names, first-seen order.
    let mut names: Vec<String> = Vec::new();
    for frame in &frames {
        for column in &frame.columns {
            if !names.contains(&column.name) {
                names.push(column.name.clone());
            }
        }
    }
    let num_rows: usize = frames.iter().map(|f| f.num_rows).sum();
    let columns = names
        .iter()
        .map(|name| {
            let mut values = Vec::with_capacity(num_rows);
            let mut dtype = None;
            for frame in &frames {
                match frame.column_index(name) {
                    Some(idx) => {
                        dtype = dtype.or(Some(frame.columns[idx].dtype));
                        for row in 0..frame.num_rows {
                            values.push(frame.value_at(idx, row).clone());
                        }
                    },
                    None => values.extend(std::iter::repeat(Value::Null).take(frame.num_rows)),
                }
            }
            Column { name: name.clone(), dtype: dtype.unwrap_or(DType::Text), values }
        })
        .collect();
    ResultFrame { num_rows, columns }
}

fn aggregate(
    frame: ResultFrame,
    group_by: &[String],
    aggregates: &[AggregateSpec],
) -> Result<ResultFrame, PipelineError> {
    let group_idx = group_by
        .iter()
        .map(|name| {
            frame
                .column_index(name)
                .ok_or_else(|| err(format!("group by references unknown column '{name}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let agg_idx = aggregates
        .iter()
        .map(|spec| match &spec.column {
            None => Ok(None),
            Some(name) => frame
                .column_index(name)
                .map(Some)
                .ok_or_else(|| err(format!("aggregate references unknown column '{name}'"))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Group rows, preserving first-seen group order for determinism.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for row in 0..frame.num_rows {
        let key = if group_by.is_empty() {
            String::from("[]")
        } else {
            join_key(&frame, &group_idx, row)
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }
    // A global aggregate over zero rows still yields one (empty) group.
    if group_by.is_empty() && frame.num_rows == 0 {
        order.push(String::from("[]"));
        groups.insert(String::from("[]"), Vec::new());
    }

    let mut columns: Vec<Column> = group_by
        .iter()
        .zip(&group_idx)
        .map(|(name, &idx)| Column {
            name: name.clone(),
            dtype: frame.columns[idx].dtype,
            values: Vec::new(),
        })
        .collect();
    for spec in aggregates {
        let dtype = match spec.op {
            AggOp::Count => DType::Int,
            _ => DType::Float,
        };
        columns.push(Column { name: spec.alias.clone(), dtype, values: Vec::new() });
    }

    for key in &order {
        let rows = &groups[key];
        for (gi, &idx) in group_idx.iter().enumerate() {
            let value = rows
                .first()
                .map_or(Value::Null, |&row| frame.value_at(idx, row).clone());
            columns[gi].values.push(value);
        }
        for (ai, spec) in aggregates.iter().enumerate() {
            let out = compute_aggregate(&frame, rows, spec, agg_idx[ai]);
            columns[group_by.len() + ai].values.push(out);
        }
    }

    let num_rows = order.len();
    Ok(ResultFrame { num_rows, columns })
}

fn compute_aggregate(
    frame: &ResultFrame,
    rows: &[usize],
    spec: &AggregateSpec,
    column: Option<usize>,
) -> Value {
    match spec.op {
        AggOp::Count => match column {
            None => Value::from(rows.len() as u64),
            Some(idx) => Value::from(
                rows.iter()
                    .filter(|&&row| !frame.value_at(idx, row).is_null())
                    .count() as u64,
            ),
        },
        AggOp::Sum | AggOp::Avg => {
            let Some(idx) = column else { return Value::Null };
            let numbers: Vec<f64> = rows
                .iter()
                .filter_map(|&row| as_f64(frame.value_at(idx, row)))
                .collect();
            if numbers.is_empty() {
                return Value::Null;
            }
            let sum: f64 = numbers.iter().sum();
            let out = if spec.op == AggOp::Sum { sum } else { sum / numbers.len() as f64 };
            serde_json::Number::from_f64(out).map_or(Value::Null, Value::Number)
        },
        AggOp::Min | AggOp::Max => {
            let Some(idx) = column else { return Value::Null };
            let mut best: Option<&Value> = None;
            for &row in rows {
                let value = frame.value_at(idx, row);
                if value.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let ordering = cmp_values(value, current);
                        let better = if spec.op == AggOp::Min {
                            ordering == Ordering::Less
                        } else {
                            ordering == Ordering::Greater
                        };
                        if better { value } else { current }
                    },
                });
            }
            best.cloned().unwrap_or(Value::Null)
        },
    }
}

fn order_limit(
    frame: ResultFrame,
    order_by: &[SortKey],
    limit: Option<usize>,
) -> Result<ResultFrame, PipelineError> {
    let keys = order_by
        .iter()
        .map(|key| {
            frame
                .column_index(&key.column)
                .map(|idx| (idx, key.descending))
                .ok_or_else(|| err(format!("order by references unknown column '{}'", key.column)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut indices: Vec<usize> = (0..frame.num_rows).collect();
    indices.sort_by(|&a, &b| {
        for &(idx, descending) in &keys {
            let ordering = cmp_values(frame.value_at(idx, a), frame.value_at(idx, b));
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    if let Some(limit) = limit {
        indices.truncate(limit);
    }
    Ok(frame.take(&indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales(rows: Vec<(i64, &str, f64)>) -> ResultFrame {
        ResultFrame::from_rows(
            vec!["id".into(), "region".into(), "revenue".into()],
            rows.into_iter()
                .map(|(id, region, revenue)| vec![json!(id), json!(region), json!(revenue)])
                .collect(),
        )
    }

    fn inputs(frame: ResultFrame) -> BTreeMap<String, ResultFrame> {
        BTreeMap::from([(String::from("sq_0"), frame)])
    }

    #[test]
    fn passthrough_scan_returns_the_frame() {
        let frame = sales(vec![(1, "us", 10.0)]);
        let out = evaluate(&ResultPlan::passthrough("sq_0"), &inputs(frame.clone())).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn missing_input_is_an_error() {
        let plan = ResultPlan::passthrough("sq_missing");
        let error = evaluate(&plan, &BTreeMap::new()).unwrap_err();
        assert_eq!(error.code, ErrorCode::ExecutionFailed);
    }

    #[test]
    fn filter_and_order_limit() {
        let frame = sales(vec![(1, "us", 10.0), (2, "eu", 40.0), (3, "us", 25.0)]);
        let plan = ResultPlan {
            root: ResultPlanNode::OrderLimit {
                input: Box::new(ResultPlanNode::Filter {
                    input: Box::new(ResultPlanNode::Scan { sub_query: "sq_0".into() }),
                    column: "revenue".into(),
                    compare: CompareOp::Gt,
                    value: ScalarValue::Float(15.0),
                }),
                order_by: vec![SortKey { column: "revenue".into(), descending: true }],
                limit: Some(1),
            },
        };
        let out = evaluate(&plan, &inputs(frame)).unwrap();
        assert_eq!(out.num_rows, 1);
        assert_eq!(out.value_at(0, 0), &json!(2));
    }

    #[test]
    fn union_aligns_columns_by_name() {
        let us = ResultFrame::from_rows(
            vec!["region".into(), "total".into()],
            vec![vec![json!("us"), json!(100.0)]],
        );
        let eu = ResultFrame::from_rows(
            vec!["total".into(), "region".into()],
            vec![vec![json!(80.0), json!("eu")]],
        );
        let plan = ResultPlan {
            root: ResultPlanNode::Union {
                inputs: vec![
                    ResultPlanNode::Scan { sub_query: "us".into() },
                    ResultPlanNode::Scan { sub_query: "eu".into() },
                ],
            },
        };
        let frames = BTreeMap::from([(String::from("us"), us), (String::from("eu"), eu)]);
        let out = evaluate(&plan, &frames).unwrap();
        assert_eq!(out.num_rows, 2);
        assert_eq!(out.column("region").unwrap().values, vec![json!("us"), json!("eu")]);
        assert_eq!(out.column("total").unwrap().values, vec![json!(100.0), json!(80.0)]);
    }

    #[test]
    fn inner_join_matches_keys() {
        let left = ResultFrame::from_rows(
            vec!["id".into(), "name".into()],
            vec![vec![json!(1), json!("acme")], vec![json!(2), json!("globex")]],
        );
        let right = ResultFrame::from_rows(
            vec!["customer_id".into(), "total".into()],
            vec![vec![json!(2), json!(55.0)]],
        );
        let plan = ResultPlan {
            root: ResultPlanNode::Join {
                left: Box::new(ResultPlanNode::Scan { sub_query: "l".into() }),
                right: Box::new(ResultPlanNode::Scan { sub_query: "r".into() }),
                kind: JoinKind::Inner,
                on: vec![("id".into(), "customer_id".into())],
            },
        };
        let frames = BTreeMap::from([(String::from("l"), left), (String::from("r"), right)]);
        let out = evaluate(&plan, &frames).unwrap();
        assert_eq!(out.num_rows, 1);
        assert_eq!(out.column("name").unwrap().values, vec![json!("globex")]);
        assert_eq!(out.column("total").unwrap().values, vec![json!(55.0)]);
    }

    #[test]
    fn left_join_null_fills() {
        let left = ResultFrame::from_rows(vec!["id".into()], vec![vec![json!(1)]]);
        let right = ResultFrame::from_rows(vec!["id".into()], vec![]);
        let plan = ResultPlan {
            root: ResultPlanNode::Join {
                left: Box::new(ResultPlanNode::Scan { sub_query: "l".into() }),
                right: Box::new(ResultPlanNode::Scan { sub_query: "r".into() }),
                kind: JoinKind::Left,
                on: vec![("id".into(), "id".into())],
            },
        };
        let frames = BTreeMap::from([(String::from("l"), left), (String::from("r"), right)]);
        let out = evaluate(&plan, &frames).unwrap();
        assert_eq!(out.num_rows, 1);
        // Clashing right column is suffixed and null-filled.
        assert_eq!(out.column("id_r").unwrap().values, vec![Value::Null]);
    }

    #[test]
    fn aggregate_groups_and_computes() {
        let frame = sales(vec![(1, "us", 10.0), (2, "eu", 40.0), (3, "us", 30.0)]);
        let plan = ResultPlan {
            root: ResultPlanNode::Aggregate {
                input: Box::new(ResultPlanNode::Scan { sub_query: "sq_0".into() }),
                group_by: vec!["region".into()],
                aggregates: vec![
                    AggregateSpec { op: AggOp::Sum, column: Some("revenue".into()), alias: "total".into() },
                    AggregateSpec { op: AggOp::Count, column: None, alias: "n".into() },
                ],
            },
        };
        let out = evaluate(&plan, &inputs(frame)).unwrap();
        assert_eq!(out.num_rows, 2);
        assert_eq!(out.column("region").unwrap().values, vec![json!("us"), json!("eu")]);
        assert_eq!(out.column("total").unwrap().values, vec![json!(40.0), json!(40.0)]);
        assert_eq!(out.column("n").unwrap().values, vec![json!(2), json!(1)]);
    }

    #[test]
    fn global_aggregate_over_empty_input_yields_one_row() {
        let frame = ResultFrame::from_rows(vec!["x".into()], vec![]);
        let plan = ResultPlan {
            root: ResultPlanNode::Aggregate {
                input: Box::new(ResultPlanNode::Scan { sub_query: "sq_0".into() }),
                group_by: vec![],
                aggregates: vec![AggregateSpec { op: AggOp::Count, column: None, alias: "n".into() }],
            },
        };
        let out = evaluate(&plan, &inputs(frame)).unwrap();
        assert_eq!(out.num_rows, 1);
        assert_eq!(out.column("n").unwrap().values, vec![json!(0)]);
    }
}
