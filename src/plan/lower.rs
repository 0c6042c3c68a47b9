//! AST → logical plan lowering (spec §4.F).

use crate::ast::{AggregateFn, Predicate, PredicateExpression, ProjectionField, QueryAst, QueryLeaf};
use crate::compiler::passes::{extract_vector_predicate, vector_aware_limit};
use crate::error::CompileResult;

use super::{
    AggregateNode, FilterNode, JoinKind, JoinNode, LimitOffsetNode, LogicalPlanNode,
    NodeIdAllocator, ProjectNode, RecursiveExpandNode, ScanNode, SetOpNode, SortNode,
    VectorKnnNode,
};

fn and_all(exprs: Vec<PredicateExpression>) -> Option<PredicateExpression> {
    let mut exprs = exprs.into_iter();
    match exprs.len() {
        0 => None,
        1 => exprs.next(),
        _ => Some(PredicateExpression::And(exprs.collect())),
    }
}

fn predicates_for_alias(predicates: &[Predicate], alias: &str) -> Vec<PredicateExpression> {
    predicates
        .iter()
        .filter(|p| p.target_alias == alias)
        .map(|p| p.expr.clone())
        .collect()
}

/// Lowers a single leaf query, threading a shared vector-predicate slot so
/// at most one `vector_similarity` survives across the whole alias chain
/// (the scan's own predicates and every traversal's edge/node predicates).
fn lower_leaf(leaf: &QueryLeaf, ids: &mut NodeIdAllocator) -> CompileResult<LogicalPlanNode> {
    let mut vector_knn = None;

    let mut plan = LogicalPlanNode::Scan(ScanNode {
        id: ids.next(),
        alias: leaf.start.alias.clone(),
        kinds: leaf.start.kinds.clone(),
        graph_id: leaf.graph_id.clone(),
        temporal_mode: leaf.temporal_mode.clone(),
    });

    plan = apply_alias_filter(plan, &leaf.start.alias, &leaf.predicates, &mut vector_knn, ids)?;

    for traversal in &leaf.traversals {
        plan = if let Some(variable_length) = &traversal.variable_length {
            LogicalPlanNode::RecursiveExpand(RecursiveExpandNode {
                id: ids.next(),
                input: Box::new(plan),
                edge_alias: traversal.edge_alias.clone(),
                edge_kinds: traversal.edge_kinds.clone(),
                node_alias: traversal.node_alias.clone(),
                node_kinds: traversal.node_kinds.clone(),
                min_depth: variable_length.min_depth,
                max_depth: variable_length.max_depth,
                collect_path: variable_length.collect_path,
                path_alias: variable_length.path_alias.clone(),
                depth_alias: variable_length.depth_alias.clone(),
            })
        } else {
            LogicalPlanNode::Join(JoinNode {
                id: ids.next(),
                input: Box::new(plan),
                edge_alias: traversal.edge_alias.clone(),
                edge_kinds: traversal.edge_kinds.clone(),
                node_alias: traversal.node_alias.clone(),
                node_kinds: traversal.node_kinds.clone(),
                kind: if traversal.optional {
                    JoinKind::Left
                } else {
                    JoinKind::Inner
                },
            })
        };

        plan = apply_alias_filter(plan, &traversal.edge_alias, &leaf.predicates, &mut vector_knn, ids)?;
        plan = apply_alias_filter(plan, &traversal.node_alias, &leaf.predicates, &mut vector_knn, ids)?;
    }

    if let Some(vector) = vector_knn {
        plan = LogicalPlanNode::VectorKnn(VectorKnnNode {
            id: ids.next(),
            input: Box::new(plan),
            field: vector.field,
            metric: vector.metric,
            query_embedding: vector.query_embedding,
            k: vector.k,
        });
    }

    let has_aggregate_projection = leaf
        .projection
        .iter()
        .any(|p: &ProjectionField| p.aggregate.is_some());
    if !leaf.group_by.is_empty() || leaf.having.is_some() || has_aggregate_projection {
        let aggregates: Vec<(AggregateFn, Option<_>)> = leaf
            .projection
            .iter()
            .filter_map(|p| p.aggregate.map(|f| (f, p.pointer.as_ref().map(|_| field_ref_for(p)))))
            .collect();
        plan = LogicalPlanNode::Aggregate(AggregateNode {
            id: ids.next(),
            input: Box::new(plan),
            group_by: leaf.group_by.clone(),
            having: leaf.having.clone(),
            aggregates,
        });
    }

    if !leaf.order_by.is_empty() {
        plan = LogicalPlanNode::Sort(SortNode {
            id: ids.next(),
            input: Box::new(plan),
            order_by: leaf.order_by.clone(),
        });
    }

    let effective_limit = vector_aware_limit(leaf.limit, vector_from_plan(&plan).as_ref());
    if effective_limit.is_some() || leaf.offset.is_some() {
        plan = LogicalPlanNode::LimitOffset(LimitOffsetNode {
            id: ids.next(),
            input: Box::new(plan),
            limit: effective_limit,
            offset: leaf.offset,
        });
    }

    let collapsed_traversal_alias = if leaf.traversals.len() == 1 && leaf.predicates.len() <= 1 {
        Some(leaf.traversals[0].node_alias.clone())
    } else {
        None
    };

    Ok(LogicalPlanNode::Project(ProjectNode {
        id: ids.next(),
        input: Box::new(plan),
        projection: leaf.projection.clone(),
        collapsed_traversal_alias,
    }))
}

/// Walks down through any wrapping `aggregate`/`sort`/`filter`/`join`/
/// `limit_offset` nodes to find a `vector_knn` node built earlier in this
/// same lowering call — aggregation and sort are applied *after* the vector
/// predicate is extracted (see above), so by the time `effective_limit` is
/// computed the node is no longer necessarily at the top of the chain.
fn vector_from_plan(plan: &LogicalPlanNode) -> Option<crate::ast::VectorSimilarity> {
    match plan {
        LogicalPlanNode::VectorKnn(n) => Some(crate::ast::VectorSimilarity {
            field: n.field.clone(),
            metric: n.metric,
            query_embedding: n.query_embedding.clone(),
            k: n.k,
        }),
        LogicalPlanNode::Filter(n) => vector_from_plan(n.input.as_ref()),
        LogicalPlanNode::Join(n) => vector_from_plan(n.input.as_ref()),
        LogicalPlanNode::Aggregate(n) => vector_from_plan(n.input.as_ref()),
        LogicalPlanNode::Sort(n) => vector_from_plan(n.input.as_ref()),
        LogicalPlanNode::LimitOffset(n) => vector_from_plan(n.input.as_ref()),
        LogicalPlanNode::Project(n) => vector_from_plan(n.input.as_ref()),
        LogicalPlanNode::Scan(_) | LogicalPlanNode::RecursiveExpand(_) | LogicalPlanNode::SetOp(_) => None,
    }
}

fn field_ref_for(projection: &ProjectionField) -> crate::ast::FieldRef {
    crate::ast::FieldRef::new(
        projection.alias.clone(),
        projection
            .pointer
            .clone()
            .unwrap_or_else(crate::pointer::JsonPointer::root),
        crate::ast::ValueType::Number,
    )
}

fn apply_alias_filter(
    plan: LogicalPlanNode,
    alias: &str,
    predicates: &[Predicate],
    vector_slot: &mut Option<crate::ast::VectorSimilarity>,
    ids: &mut NodeIdAllocator,
) -> CompileResult<LogicalPlanNode> {
    let combined = and_all(predicates_for_alias(predicates, alias));
    let Some(combined) = combined else {
        return Ok(plan);
    };

    let extraction = extract_vector_predicate(Some(combined))?;
    if let Some(vector) = extraction.vector {
        if vector_slot.is_some() {
            return Err(crate::error::CompileError::unsupported(
                "at most one vector_similarity predicate is supported per query",
            ));
        }
        *vector_slot = Some(vector);
    }

    Ok(match extraction.remaining {
        Some(predicate) => LogicalPlanNode::Filter(FilterNode {
            id: ids.next(),
            input: Box::new(plan),
            alias: alias.to_string(),
            predicate,
        }),
        None => plan,
    })
}

/// Lowers any [`QueryAst`] — leaf or set operation — into a [`LogicalPlanNode`].
/// Pure with respect to dialect: temporal-mode and vector metadata are
/// carried as data on the plan nodes, resolved to SQL text only at emission.
pub fn lower(ast: &QueryAst) -> CompileResult<LogicalPlanNode> {
    ast.validate()?;
    let mut ids = NodeIdAllocator::default();
    lower_inner(ast, &mut ids)
}

fn lower_inner(ast: &QueryAst, ids: &mut NodeIdAllocator) -> CompileResult<LogicalPlanNode> {
    match ast {
        QueryAst::Leaf(leaf) => lower_leaf(leaf, ids),
        QueryAst::SetOperation(set_op) => {
            let left = lower_inner(&set_op.left, ids)?;
            let right = lower_inner(&set_op.right, ids)?;
            let mut plan = LogicalPlanNode::SetOp(SetOpNode {
                id: ids.next(),
                operator: set_op.operator,
                left: Box::new(left),
                right: Box::new(right),
            });
            if !set_op.order_by.is_empty() {
                plan = LogicalPlanNode::Sort(SortNode {
                    id: ids.next(),
                    input: Box::new(plan),
                    order_by: set_op.order_by.clone(),
                });
            }
            if set_op.limit.is_some() || set_op.offset.is_some() {
                plan = LogicalPlanNode::LimitOffset(LimitOffsetNode {
                    id: ids.next(),
                    input: Box::new(plan),
                    limit: set_op.limit,
                    offset: set_op.offset,
                });
            }
            Ok(plan)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ComparisonOp, FieldRef, OrderByField, OrderDirection, PredicateValue, ScalarValue,
        StartSpec, TargetType, Traversal, ValueType, VectorMetric, VectorSimilarity,
    };
    use crate::pointer::JsonPointer;

    fn leaf(alias: &str) -> QueryLeaf {
        QueryLeaf::new(
            "g1".into(),
            StartSpec {
                alias: alias.to_string(),
                kinds: vec!["Person".into()],
                include_sub_classes: false,
            },
        )
    }

    #[test]
    fn simple_scan_lowers_to_project_over_scan() {
        let mut query = leaf("p");
        query.projection.push(ProjectionField {
            alias: "p".into(),
            pointer: None,
            output_name: "p".into(),
            aggregate: None,
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        match plan {
            LogicalPlanNode::Project(node) => {
                assert!(matches!(*node.input, LogicalPlanNode::Scan(_)));
            }
            other => panic!("expected project root, got {other:?}"),
        }
    }

    #[test]
    fn traversal_lowers_to_join_chain() {
        let mut query = leaf("p");
        query.traversals.push(Traversal {
            edge_alias: "e".into(),
            edge_kinds: vec!["worksAt".into()],
            node_alias: "c".into(),
            node_kinds: vec!["Company".into()],
            include_sub_classes: false,
            optional: false,
            variable_length: None,
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        assert!(plan.contains("join"));
    }

    #[test]
    fn variable_length_traversal_lowers_to_recursive_expand() {
        let mut query = leaf("p");
        query.traversals.push(Traversal {
            edge_alias: "e".into(),
            edge_kinds: vec!["knows".into()],
            node_alias: "f".into(),
            node_kinds: vec!["Person".into()],
            include_sub_classes: false,
            optional: false,
            variable_length: Some(crate::ast::VariableLength {
                min_depth: 1,
                max_depth: Some(3),
                collect_path: true,
                path_alias: Some("path".into()),
                depth_alias: Some("depth".into()),
            }),
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        assert!(plan.contains("recursive_expand"));
        assert!(!plan.contains("join"));
    }

    #[test]
    fn vector_predicate_is_lifted_into_vector_knn_node() {
        let mut query = leaf("p");
        query.predicates.push(Predicate {
            target_alias: "p".into(),
            target_type: TargetType::Node,
            expr: PredicateExpression::VectorSimilarity(VectorSimilarity {
                field: FieldRef::new("p", JsonPointer::parse("/embedding").unwrap(), ValueType::Array),
                metric: VectorMetric::Cosine,
                query_embedding: vec![0.1, 0.2],
                k: 5,
            }),
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        assert!(plan.contains("vector_knn"));
    }

    #[test]
    fn vector_k_becomes_effective_limit_when_unset() {
        let mut query = leaf("p");
        query.predicates.push(Predicate {
            target_alias: "p".into(),
            target_type: TargetType::Node,
            expr: PredicateExpression::VectorSimilarity(VectorSimilarity {
                field: FieldRef::new("p", JsonPointer::parse("/embedding").unwrap(), ValueType::Array),
                metric: VectorMetric::Cosine,
                query_embedding: vec![0.1],
                k: 9,
            }),
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        match plan {
            LogicalPlanNode::LimitOffset(node) => assert_eq!(node.limit, Some(9)),
            other => panic!("expected limitOffset root, got {other:?}"),
        }
    }

    #[test]
    fn vector_k_becomes_effective_limit_even_when_sort_wraps_it() {
        let mut query = leaf("p");
        query.order_by.push(OrderByField {
            alias: "p".into(),
            pointer: None,
            direction: OrderDirection::Asc,
        });
        query.predicates.push(Predicate {
            target_alias: "p".into(),
            target_type: TargetType::Node,
            expr: PredicateExpression::VectorSimilarity(VectorSimilarity {
                field: FieldRef::new("p", JsonPointer::parse("/embedding").unwrap(), ValueType::Array),
                metric: VectorMetric::Cosine,
                query_embedding: vec![0.1],
                k: 9,
            }),
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        match plan {
            LogicalPlanNode::LimitOffset(node) => assert_eq!(node.limit, Some(9)),
            other => panic!("expected limitOffset root, got {other:?}"),
        }
    }

    #[test]
    fn order_by_wraps_plan_in_sort() {
        let mut query = leaf("p");
        query.order_by.push(OrderByField {
            alias: "p".into(),
            pointer: None,
            direction: OrderDirection::Asc,
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        assert!(plan.contains("sort"));
    }

    #[test]
    fn group_by_wraps_plan_in_aggregate() {
        let mut query = leaf("p");
        query.group_by.push(FieldRef::new(
            "p",
            JsonPointer::parse("/department").unwrap(),
            ValueType::String,
        ));
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        assert!(plan.contains("aggregate"));
    }

    #[test]
    fn set_operation_lowers_to_set_op_root() {
        let left = QueryAst::Leaf(leaf("p"));
        let right = QueryAst::Leaf(leaf("p"));
        let set_op = QueryAst::SetOperation(crate::ast::SetOperationAst {
            operator: crate::ast::SetOperator::Union,
            left: Box::new(left),
            right: Box::new(right),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        });
        let plan = lower(&set_op).unwrap();
        assert!(matches!(plan, LogicalPlanNode::SetOp(_)));
    }

    #[test]
    fn equal_predicate_combines_and_yields_single_filter() {
        let mut query = leaf("p");
        query.predicates.push(Predicate {
            target_alias: "p".into(),
            target_type: TargetType::Node,
            expr: PredicateExpression::Comparison {
                field: FieldRef::new("p", JsonPointer::parse("/name").unwrap(), ValueType::String),
                op: ComparisonOp::Eq,
                value: PredicateValue::Scalar(ScalarValue::String("Ada".into())),
            },
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        assert!(plan.contains("filter"));
    }
}
