//! The deterministic aggregation recipe.
//!
//! A small program in a closed operator set over named sub-query outputs.
//! The aggregator executes it with the in-process evaluator; no LLM runs
//! after SQL execution, and nothing here can carry a SQL string.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ast::{JoinKind, ScalarValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub op: AggOp,
    /// `None` counts rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub alias: String,
}

/// One sort key over output columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

/// Operator tree over named sub-query outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum ResultPlanNode {
    Scan {
        sub_query: String,
    },
    Project {
        input: Box<ResultPlanNode>,
        columns: Vec<String>,
    },
    Filter {
        input: Box<ResultPlanNode>,
        column: String,
        compare: CompareOp,
        value: ScalarValue,
    },
    Join {
        left: Box<ResultPlanNode>,
        right: Box<ResultPlanNode>,
        kind: JoinKind,
        /// Equality pairs: (left column, right column).
        on: Vec<(String, String)>,
    },
    Union {
        inputs: Vec<ResultPlanNode>,
    },
    Aggregate {
        input: Box<ResultPlanNode>,
        group_by: Vec<String>,
        aggregates: Vec<AggregateSpec>,
    },
    OrderLimit {
        input: Box<ResultPlanNode>,
        order_by: Vec<SortKey>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
}

impl ResultPlanNode {
    fn collect_scans<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Scan { sub_query } => {
                out.insert(sub_query);
            },
            Self::Project { input, .. }
            | Self::Filter { input, .. }
            | Self::Aggregate { input, .. }
            | Self::OrderLimit { input, .. } => input.collect_scans(out),
            Self::Join { left, right, .. } => {
                left.collect_scans(out);
                right.collect_scans(out);
            },
            Self::Union { inputs } => {
                for input in inputs {
                    input.collect_scans(out);
                }
            },
        }
    }
}

/// The aggregation plan. Always present: single-table projections get a
/// one-op plan too, so the aggregation path is uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPlan {
    pub root: ResultPlanNode,
}

impl ResultPlan {
    /// The trivial plan over one sub-query.
    pub fn passthrough(sub_query: impl Into<String>) -> Self {
        Self { root: ResultPlanNode::Scan { sub_query: sub_query.into() } }
    }

    /// Sub-query ids the plan requires.
    pub fn required_sub_queries(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.root.collect_scans(&mut out);
        out.into_iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_sub_queries_are_collected() {
        let plan = ResultPlan {
            root: ResultPlanNode::Union {
                inputs: vec![
                    ResultPlanNode::Scan { sub_query: "sq_0".into() },
                    ResultPlanNode::Project {
                        input: Box::new(ResultPlanNode::Scan { sub_query: "sq_1".into() }),
                        columns: vec!["a".into()],
                    },
                ],
            },
        };
        let required = plan.required_sub_queries();
        assert!(required.contains("sq_0"));
        assert!(required.contains("sq_1"));
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn plan_serde_is_tagged_by_op() {
        let plan = ResultPlan::passthrough("sq_0");
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["root"]["op"], "scan");
    }
}
