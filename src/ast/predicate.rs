//! Predicate expressions: the leaf and boolean-connective building blocks of
//! a query's `WHERE`/`HAVING` clauses.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::pointer::JsonPointer;

use super::value::{PredicateValue, ValueType};
use super::{FieldRef, QueryAst};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum StringOp {
    Contains,
    StartsWith,
    EndsWith,
    Like,
    Ilike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum NullCheckOp {
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ArrayOp {
    IsEmpty,
    IsNotEmpty,
    LengthEq { value: i64 },
    LengthGt { value: i64 },
    LengthGte { value: i64 },
    LengthLt { value: i64 },
    LengthLte { value: i64 },
    Contains { value: PredicateValue },
    ContainsAll { values: Vec<PredicateValue> },
    ContainsAny { values: Vec<PredicateValue> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ObjectOp {
    HasKey { key: String },
    HasPath {
        #[schemars(with = "String")]
        pointer: JsonPointer,
    },
    PathEquals {
        #[schemars(with = "String")]
        pointer: JsonPointer,
        value: PredicateValue,
    },
    PathContains {
        #[schemars(with = "String")]
        pointer: JsonPointer,
        value: PredicateValue,
    },
    PathIsNull {
        #[schemars(with = "String")]
        pointer: JsonPointer,
    },
    PathIsNotNull {
        #[schemars(with = "String")]
        pointer: JsonPointer,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum AggregateFn {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VectorMetric {
    Cosine,
    L2,
    InnerProduct,
}

/// A similarity predicate against a dense vector column. Structurally present
/// in the AST but lifted out by the vector-predicate-extraction compiler pass
/// (spec'd in [`crate::compiler::passes`]) into a dedicated plan node — it
/// never reaches the predicate compiler itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VectorSimilarity {
    pub field: FieldRef,
    pub metric: VectorMetric,
    pub query_embedding: Vec<f32>,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateComparison {
    pub func: AggregateFn,
    /// Absent for `count` (which counts rows, not a column).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldRef>,
    pub op: ComparisonOp,
    pub value: PredicateValue,
}

/// A correlated or uncorrelated subquery reference. `negated` distinguishes
/// `in_subquery` from `notInSubquery`; `Exists` has no left-hand field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InSubquery {
    pub field: FieldRef,
    pub negated: bool,
    pub subquery: Box<QueryAst>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateExpression {
    Comparison {
        field: FieldRef,
        op: ComparisonOp,
        value: PredicateValue,
    },
    StringOp {
        field: FieldRef,
        op: StringOp,
        pattern: String,
    },
    NullCheck {
        field: FieldRef,
        op: NullCheckOp,
    },
    Between {
        field: FieldRef,
        low: PredicateValue,
        high: PredicateValue,
    },
    ArrayOp {
        field: FieldRef,
        op: ArrayOp,
    },
    ObjectOp {
        field: FieldRef,
        op: ObjectOp,
    },
    AggregateComparison(AggregateComparison),
    Exists {
        graph_id: String,
        subquery: Box<QueryAst>,
    },
    InSubquery {
        graph_id: String,
        inner: InSubquery,
    },
    VectorSimilarity(VectorSimilarity),
    And(Vec<PredicateExpression>),
    Or(Vec<PredicateExpression>),
    Not(Box<PredicateExpression>),
}

impl PredicateExpression {
    /// Validates the structural constraints from spec §4.D that do not
    /// require plan-level context (those belong to the compiler passes):
    /// `in`/`notIn` homogeneity, `vector_similarity` placement, and the
    /// single-scalar-column shape of `in_subquery`'s subquery.
    pub fn validate(&self) -> CompileResult<()> {
        self.validate_at(false)
    }

    fn validate_at(&self, under_or_or_not: bool) -> CompileResult<()> {
        match self {
            PredicateExpression::Comparison { op, value, .. } => {
                if matches!(op, ComparisonOp::In | ComparisonOp::NotIn) && !value.is_homogeneous()
                {
                    return Err(CompileError::validation(
                        "in/notIn right-hand array must be homogeneous in valueType",
                    ));
                }
                Ok(())
            }
            PredicateExpression::StringOp { .. }
            | PredicateExpression::NullCheck { .. }
            | PredicateExpression::Between { .. }
            | PredicateExpression::ArrayOp { .. }
            | PredicateExpression::ObjectOp { .. }
            | PredicateExpression::AggregateComparison(_) => Ok(()),
            PredicateExpression::Exists { subquery, .. } => validate_subquery_ast(subquery),
            PredicateExpression::InSubquery { inner, .. } => {
                validate_in_subquery_projection(&inner.field, &inner.subquery)?;
                validate_subquery_ast(&inner.subquery)
            }
            PredicateExpression::VectorSimilarity(_) => {
                if under_or_or_not {
                    return Err(CompileError::unsupported(
                        "vector_similarity may not appear under or/not",
                    ));
                }
                Ok(())
            }
            PredicateExpression::And(children) => {
                for child in children {
                    child.validate_at(under_or_or_not)?;
                }
                Ok(())
            }
            PredicateExpression::Or(children) => {
                for child in children {
                    child.validate_at(true)?;
                }
                Ok(())
            }
            PredicateExpression::Not(child) => child.validate_at(true),
        }
    }
}

fn validate_subquery_ast(ast: &QueryAst) -> CompileResult<()> {
    match ast {
        QueryAst::Leaf(leaf) if leaf.graph_id.is_empty() => Err(CompileError::validation(
            "exists/in_subquery must carry a graphId",
        )),
        _ => Ok(()),
    }
}

/// `in_subquery`'s nested query must project exactly one scalar column whose
/// `valueType` is compatible with the left field (array/object rejected).
fn validate_in_subquery_projection(field: &FieldRef, subquery: &QueryAst) -> CompileResult<()> {
    let QueryAst::Leaf(leaf) = subquery else {
        return Err(CompileError::validation(
            "in_subquery must reference a single leaf query, not a set operation",
        ));
    };
    if leaf.projection.len() != 1 {
        return Err(CompileError::validation(format!(
            "in_subquery projection must select exactly one column, found {}",
            leaf.projection.len()
        )));
    }
    if matches!(field.value_type, ValueType::Array | ValueType::Object) {
        return Err(CompileError::validation(
            "in_subquery left field must be string/number/boolean/date",
        ));
    }
    Ok(())
}
