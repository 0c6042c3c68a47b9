//! The query AST: the tagged union queries are built as, before any
//! compilation happens. Everything here is pure data — no method on these
//! types touches a dialect or a schema.

pub mod predicate;
pub mod value;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::pointer::JsonPointer;

pub use predicate::{
    AggregateComparison, AggregateFn, ArrayOp, ComparisonOp, InSubquery, NullCheckOp, ObjectOp,
    PredicateExpression, StringOp, VectorMetric, VectorSimilarity,
};
pub use value::{PredicateValue, ScalarValue, ValueType};

/// A typed reference into a node/edge row, addressed through its alias and a
/// JSON pointer into the row's `props` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    pub alias: String,
    #[schemars(with = "String")]
    pub pointer: JsonPointer,
    pub value_type: ValueType,
}

impl FieldRef {
    pub fn new(alias: impl Into<String>, pointer: JsonPointer, value_type: ValueType) -> Self {
        Self {
            alias: alias.into(),
            pointer,
            value_type,
        }
    }
}

/// Row-visibility mode applied by the temporal filter compiler pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum TemporalMode {
    Current,
    IncludeEnded,
    IncludeTombstones,
    AsOf { timestamp: DateTime<Utc> },
}

impl Default for TemporalMode {
    fn default() -> Self {
        TemporalMode::Current
    }
}

/// Which side of a node/edge pair a [`PredicateExpression`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum TargetType {
    Node,
    Edge,
}

/// A predicate bound to the alias/side it filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub target_alias: String,
    pub target_type: TargetType,
    pub expr: PredicateExpression,
}

/// The starting node set of a leaf query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSpec {
    pub alias: String,
    pub kinds: Vec<String>,
    pub include_sub_classes: bool,
}

/// Bounded or unbounded path traversal, lowered to a [`crate::plan::LogicalPlanNode::RecursiveExpand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariableLength {
    pub min_depth: u32,
    pub max_depth: Option<u32>,
    pub collect_path: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_alias: Option<String>,
}

/// A single hop from the previous alias to a new node through an edge kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Traversal {
    pub edge_alias: String,
    pub edge_kinds: Vec<String>,
    pub node_alias: String,
    pub node_kinds: Vec<String>,
    pub include_sub_classes: bool,
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_length: Option<VariableLength>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderByField {
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub pointer: Option<JsonPointer>,
    pub direction: OrderDirection,
}

/// One output column. `aggregate` is `Some` only when the field is computed
/// over a `groupBy` (or the whole result set, if `groupBy` is empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionField {
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub pointer: Option<JsonPointer>,
    pub output_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateFn>,
}

/// A standard (non-set-operation) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryLeaf {
    pub graph_id: String,
    pub start: StartSpec,
    #[serde(default)]
    pub traversals: Vec<Traversal>,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub projection: Vec<ProjectionField>,
    #[serde(default)]
    pub group_by: Vec<FieldRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<PredicateExpression>,
    #[serde(default)]
    pub order_by: Vec<OrderByField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selective_fields: Option<Vec<FieldRef>>,
    #[serde(default)]
    pub temporal_mode: TemporalMode,
}

impl QueryLeaf {
    pub fn new(graph_id: String, start: StartSpec) -> Self {
        Self {
            graph_id,
            start,
            traversals: Vec::new(),
            predicates: Vec::new(),
            projection: Vec::new(),
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            selective_fields: None,
            temporal_mode: TemporalMode::default(),
        }
    }

    /// Every alias introduced by `start` and each traversal's edge/node.
    pub fn known_aliases(&self) -> HashSet<&str> {
        let mut aliases = HashSet::new();
        aliases.insert(self.start.alias.as_str());
        for traversal in &self.traversals {
            aliases.insert(traversal.edge_alias.as_str());
            aliases.insert(traversal.node_alias.as_str());
        }
        aliases
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetOperationAst {
    pub operator: SetOperator,
    pub left: Box<QueryAst>,
    pub right: Box<QueryAst>,
    #[serde(default)]
    pub order_by: Vec<OrderByField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryAst {
    Leaf(QueryLeaf),
    SetOperation(SetOperationAst),
}

impl QueryAst {
    /// The leftmost leaf, whose output names govern ordering/projection over
    /// a set operation (spec invariant iv).
    pub fn leftmost_leaf(&self) -> &QueryLeaf {
        match self {
            QueryAst::Leaf(leaf) => leaf,
            QueryAst::SetOperation(set_op) => set_op.left.leftmost_leaf(),
        }
    }

    /// Validates the structural invariants from spec §4.D/§3 that apply
    /// regardless of dialect or schema: alias introduction, edge/node alias
    /// distinctness, and predicate expression shape.
    pub fn validate(&self) -> CompileResult<()> {
        match self {
            QueryAst::Leaf(leaf) => validate_leaf(leaf),
            QueryAst::SetOperation(set_op) => {
                set_op.left.validate()?;
                set_op.right.validate()?;
                let leftmost = set_op.left.leftmost_leaf();
                for field in &set_op.order_by {
                    if !leftmost
                        .projection
                        .iter()
                        .any(|p| p.output_name == field.alias || p.alias == field.alias)
                    {
                        return Err(CompileError::validation(format!(
                            "set operation orderBy references unknown output name {:?}",
                            field.alias
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn validate_leaf(leaf: &QueryLeaf) -> CompileResult<()> {
    let known = leaf.known_aliases();

    for traversal in &leaf.traversals {
        if traversal.edge_alias == traversal.node_alias {
            return Err(CompileError::validation(format!(
                "traversal edge alias and node alias must differ, both are {:?}",
                traversal.edge_alias
            )));
        }
    }

    for predicate in &leaf.predicates {
        if !known.contains(predicate.target_alias.as_str()) {
            return Err(CompileError::validation(format!(
                "predicate targets unknown alias {:?}",
                predicate.target_alias
            )));
        }
        predicate.expr.validate()?;
    }

    for field in leaf
        .projection
        .iter()
        .map(|p| p.alias.as_str())
        .chain(leaf.order_by.iter().map(|o| o.alias.as_str()))
        .chain(leaf.group_by.iter().map(|f| f.alias.as_str()))
    {
        if !known.contains(field) {
            return Err(CompileError::validation(format!(
                "reference to unknown alias {field:?}"
            )));
        }
    }

    if let Some(having) = &leaf.having {
        having.validate()?;
    }

    let variable_length_count = leaf
        .traversals
        .iter()
        .filter(|t| t.variable_length.is_some())
        .count();
    if variable_length_count > 1 {
        return Err(CompileError::unsupported(
            "at most one traversal may carry variableLength per query",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(alias: &str) -> StartSpec {
        StartSpec {
            alias: alias.to_string(),
            kinds: vec!["Person".into()],
            include_sub_classes: false,
        }
    }

    #[test]
    fn traversal_edge_and_node_alias_must_differ() {
        let mut leaf = QueryLeaf::new("g1".into(), start("p"));
        leaf.traversals.push(Traversal {
            edge_alias: "x".into(),
            edge_kinds: vec!["worksAt".into()],
            node_alias: "x".into(),
            node_kinds: vec!["Company".into()],
            include_sub_classes: false,
            optional: false,
            variable_length: None,
        });
        assert!(QueryAst::Leaf(leaf).validate().is_err());
    }

    #[test]
    fn predicate_on_unknown_alias_is_rejected() {
        let mut leaf = QueryLeaf::new("g1".into(), start("p"));
        leaf.predicates.push(Predicate {
            target_alias: "ghost".into(),
            target_type: TargetType::Node,
            expr: PredicateExpression::NullCheck {
                field: FieldRef::new("ghost", JsonPointer::parse("/name").unwrap(), ValueType::String),
                op: NullCheckOp::IsNull,
            },
        });
        assert!(QueryAst::Leaf(leaf).validate().is_err());
    }

    #[test]
    fn valid_leaf_with_traversal_passes() {
        let mut leaf = QueryLeaf::new("g1".into(), start("p"));
        leaf.traversals.push(Traversal {
            edge_alias: "e".into(),
            edge_kinds: vec!["worksAt".into()],
            node_alias: "c".into(),
            node_kinds: vec!["Company".into()],
            include_sub_classes: false,
            optional: false,
            variable_length: None,
        });
        leaf.projection.push(ProjectionField {
            alias: "c".into(),
            pointer: None,
            output_name: "company".into(),
            aggregate: None,
        });
        assert!(QueryAst::Leaf(leaf).validate().is_ok());
    }

    #[test]
    fn at_most_one_variable_length_traversal() {
        let mut leaf = QueryLeaf::new("g1".into(), start("p"));
        for i in 0..2 {
            leaf.traversals.push(Traversal {
                edge_alias: format!("e{i}"),
                edge_kinds: vec!["knows".into()],
                node_alias: format!("n{i}"),
                node_kinds: vec!["Person".into()],
                include_sub_classes: false,
                optional: false,
                variable_length: Some(VariableLength {
                    min_depth: 1,
                    max_depth: Some(5),
                    collect_path: false,
                    path_alias: None,
                    depth_alias: None,
                }),
            });
        }
        assert!(QueryAst::Leaf(leaf).validate().is_err());
    }

    #[test]
    fn set_operation_order_by_must_reference_leftmost_output_name() {
        let mut left = QueryLeaf::new("g1".into(), start("p"));
        left.projection.push(ProjectionField {
            alias: "p".into(),
            pointer: None,
            output_name: "name".into(),
            aggregate: None,
        });
        let right = QueryLeaf::new("g1".into(), start("p"));
        let set_op = SetOperationAst {
            operator: SetOperator::Union,
            left: Box::new(QueryAst::Leaf(left)),
            right: Box::new(QueryAst::Leaf(right)),
            order_by: vec![OrderByField {
                alias: "unknown_output".into(),
                pointer: None,
                direction: OrderDirection::Asc,
            }],
            limit: None,
            offset: None,
        };
        assert!(QueryAst::SetOperation(set_op).validate().is_err());
    }
}
