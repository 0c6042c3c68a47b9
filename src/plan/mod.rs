//! The logical plan: the tagged-union tree lowering produces from a
//! [`crate::ast::QueryAst`], and the only input the SQL emitters see.
//!
//! Node ids are assigned monotonically within a single [`lower`] call and
//! carry no meaning across calls — two lowerings of the same AST may assign
//! different ids to structurally identical nodes.

mod lower;

use serde::{Deserialize, Serialize};

use crate::ast::{
    AggregateFn, FieldRef, OrderByField, PredicateExpression, ProjectionField, SetOperator,
    TemporalMode, VectorMetric,
};

pub use lower::lower;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanNode {
    pub id: PlanNodeId,
    pub alias: String,
    pub kinds: Vec<String>,
    pub graph_id: String,
    pub temporal_mode: TemporalMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub alias: String,
    pub predicate: PredicateExpression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub edge_alias: String,
    pub edge_kinds: Vec<String>,
    pub node_alias: String,
    pub node_kinds: Vec<String>,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecursiveExpandNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub edge_alias: String,
    pub edge_kinds: Vec<String>,
    pub node_alias: String,
    pub node_kinds: Vec<String>,
    pub min_depth: u32,
    pub max_depth: Option<u32>,
    pub collect_path: bool,
    pub path_alias: Option<String>,
    pub depth_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorKnnNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub field: FieldRef,
    pub metric: VectorMetric,
    pub query_embedding: Vec<f32>,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub group_by: Vec<FieldRef>,
    pub having: Option<PredicateExpression>,
    pub aggregates: Vec<(AggregateFn, Option<FieldRef>)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub order_by: Vec<OrderByField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOffsetNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectNode {
    pub id: PlanNodeId,
    pub input: Box<LogicalPlanNode>,
    pub projection: Vec<ProjectionField>,
    /// Set when every traversal collapsed into a single CTE under this
    /// alias, letting the standard emitter skip a join chain.
    pub collapsed_traversal_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOpNode {
    pub id: PlanNodeId,
    pub operator: SetOperator,
    pub left: Box<LogicalPlanNode>,
    pub right: Box<LogicalPlanNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogicalPlanNode {
    Scan(ScanNode),
    Filter(FilterNode),
    Join(JoinNode),
    RecursiveExpand(RecursiveExpandNode),
    VectorKnn(VectorKnnNode),
    Aggregate(AggregateNode),
    Sort(SortNode),
    LimitOffset(LimitOffsetNode),
    Project(ProjectNode),
    SetOp(SetOpNode),
}

impl LogicalPlanNode {
    pub fn id(&self) -> PlanNodeId {
        match self {
            LogicalPlanNode::Scan(n) => n.id,
            LogicalPlanNode::Filter(n) => n.id,
            LogicalPlanNode::Join(n) => n.id,
            LogicalPlanNode::RecursiveExpand(n) => n.id,
            LogicalPlanNode::VectorKnn(n) => n.id,
            LogicalPlanNode::Aggregate(n) => n.id,
            LogicalPlanNode::Sort(n) => n.id,
            LogicalPlanNode::LimitOffset(n) => n.id,
            LogicalPlanNode::Project(n) => n.id,
            LogicalPlanNode::SetOp(n) => n.id,
        }
    }

    /// Whether `self` or any of its inputs is a node of the given variant
    /// name (`"aggregate"`, `"sort"`, `"recursive_expand"`, …). Used by the
    /// SQL emitters' plan-shape inspectors.
    pub fn contains(&self, variant: &str) -> bool {
        let matches_self = match self {
            LogicalPlanNode::Scan(_) => variant == "scan",
            LogicalPlanNode::Filter(_) => variant == "filter",
            LogicalPlanNode::Join(_) => variant == "join",
            LogicalPlanNode::RecursiveExpand(_) => variant == "recursive_expand",
            LogicalPlanNode::VectorKnn(_) => variant == "vector_knn",
            LogicalPlanNode::Aggregate(_) => variant == "aggregate",
            LogicalPlanNode::Sort(_) => variant == "sort",
            LogicalPlanNode::LimitOffset(_) => variant == "limit_offset",
            LogicalPlanNode::Project(_) => variant == "project",
            LogicalPlanNode::SetOp(_) => variant == "set_op",
        };
        if matches_self {
            return true;
        }
        match self {
            LogicalPlanNode::Filter(n) => n.input.contains(variant),
            LogicalPlanNode::Join(n) => n.input.contains(variant),
            LogicalPlanNode::RecursiveExpand(n) => n.input.contains(variant),
            LogicalPlanNode::VectorKnn(n) => n.input.contains(variant),
            LogicalPlanNode::Aggregate(n) => n.input.contains(variant),
            LogicalPlanNode::Sort(n) => n.input.contains(variant),
            LogicalPlanNode::LimitOffset(n) => n.input.contains(variant),
            LogicalPlanNode::Project(n) => n.input.contains(variant),
            LogicalPlanNode::SetOp(n) => n.left.contains(variant) || n.right.contains(variant),
            LogicalPlanNode::Scan(_) => false,
        }
    }
}

/// Monotonically assigns ids to nodes created during one [`lower`] call.
#[derive(Debug, Default)]
pub(crate) struct NodeIdAllocator(u32);

impl NodeIdAllocator {
    pub(crate) fn next(&mut self) -> PlanNodeId {
        let id = self.0;
        self.0 += 1;
        PlanNodeId(id)
    }
}
