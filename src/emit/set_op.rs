//! Set-operation emitter: plans whose root (possibly under `sort`/
//! `limit_offset`) is a `set_op` node (spec §4.H "Set-operation emitter").
//! Dispatches on the dialect's [`SetOperationStrategy`] since PostgreSQL and
//! SQLite disagree on whether a compound statement may parenthesize its
//! leaves.

use crate::ast::{OrderByField, PredicateExpression, ProjectionField, SetOperator, TemporalMode};
use crate::compiler::passes::temporal_filter_fragment;
use crate::dialect::{DialectAdapter, SetOperationStrategy};
use crate::error::{CompileError, CompileResult};
use crate::plan::{LimitOffsetNode, LogicalPlanNode, ProjectNode, ScanNode, SetOpNode, SortNode};
use crate::predicate_compiler::{self, CteColumnPrefix, PredicateCompilerContext};

use super::{limit_offset_clause, order_by_clause, render_ctes, Cte, NODE_TABLE};

struct Shape<'a> {
    limit_offset: Option<&'a LimitOffsetNode>,
    sort: Option<&'a SortNode>,
    set_op: &'a SetOpNode,
}

fn inspect(plan: &LogicalPlanNode) -> CompileResult<Shape<'_>> {
    let mut cursor = plan;
    let mut limit_offset = None;
    if let LogicalPlanNode::LimitOffset(n) = cursor {
        limit_offset = Some(n);
        cursor = n.input.as_ref();
    }
    let mut sort = None;
    if let LogicalPlanNode::Sort(n) = cursor {
        sort = Some(n);
        cursor = n.input.as_ref();
    }
    let LogicalPlanNode::SetOp(set_op) = cursor else {
        return Err(CompileError::invariant(
            "set_op_emitter",
            "plan does not contain set_op at the expected position",
        ));
    };
    Ok(Shape { limit_offset, sort, set_op })
}

fn operator_keyword(operator: SetOperator) -> &'static str {
    match operator {
        SetOperator::Union => "UNION",
        SetOperator::UnionAll => "UNION ALL",
        SetOperator::Intersect => "INTERSECT",
        SetOperator::Except => "EXCEPT",
    }
}

/// Walks the left spine of a (possibly nested) set-op tree to find the
/// leftmost leaf's projection, which is what a set operation's `ORDER BY`
/// and output columns are named after.
fn leftmost_projection(node: &LogicalPlanNode) -> CompileResult<&[ProjectionField]> {
    match node {
        LogicalPlanNode::Project(p) => Ok(&p.projection),
        LogicalPlanNode::LimitOffset(n) => leftmost_projection(n.input.as_ref()),
        LogicalPlanNode::Sort(n) => leftmost_projection(n.input.as_ref()),
        LogicalPlanNode::SetOp(n) => leftmost_projection(n.left.as_ref()),
        other => Err(CompileError::invariant(
            "set_op_emitter",
            format!("unexpected node at the left edge of a set operation: {other:?}"),
        )),
    }
}

/// Maps an order-by field-ref to the leftmost leaf's output column name —
/// the only naming stable across every leaf of a set operation.
fn resolve_output_name(field: &OrderByField, projection: &[ProjectionField]) -> CompileResult<String> {
    projection
        .iter()
        .find(|p| p.output_name == field.alias || p.alias == field.alias)
        .map(|p| p.output_name.clone())
        .ok_or_else(|| {
            CompileError::unsupported(format!(
                "set operation orderBy field {:?} does not match an output column; available columns: {}",
                field.alias,
                projection.iter().map(|p| p.output_name.as_str()).collect::<Vec<_>>().join(", "),
            ))
        })
}

fn suffix_clauses(shape: &Shape<'_>, projection: &[ProjectionField]) -> CompileResult<String> {
    let mut sql = String::new();
    if let Some(sort) = shape.sort {
        for field in &sort.order_by {
            resolve_output_name(field, projection)?;
        }
        let clause = order_by_clause(&sort.order_by, |field| {
            resolve_output_name(field, projection).expect("validated above")
        });
        sql.push_str(&format!(" ORDER BY {clause}"));
    }
    if let Some(limit_offset) = shape.limit_offset {
        sql.push_str(&limit_offset_clause(limit_offset.limit, limit_offset.offset));
    }
    Ok(sql)
}

fn emit_standard_parenthesized(shape: &Shape<'_>, dialect: &dyn DialectAdapter) -> CompileResult<String> {
    let set_op = shape.set_op;
    let left_sql = super::emit(set_op.left.as_ref(), dialect)?;
    let right_sql = super::emit(set_op.right.as_ref(), dialect)?;
    let projection = leftmost_projection(set_op.left.as_ref())?;

    let mut sql = format!("({left_sql}) {} ({right_sql})", operator_keyword(set_op.operator));
    sql.push_str(&suffix_clauses(shape, projection)?);
    Ok(sql)
}

fn predicate_contains_subquery(expr: &PredicateExpression) -> bool {
    match expr {
        PredicateExpression::Exists { .. } | PredicateExpression::InSubquery { .. } => true,
        PredicateExpression::And(children) | PredicateExpression::Or(children) => {
            children.iter().any(predicate_contains_subquery)
        }
        PredicateExpression::Not(child) => predicate_contains_subquery(child),
        _ => false,
    }
}

fn push_unique(offending: &mut Vec<&'static str>, feature: &'static str) {
    if !offending.contains(&feature) {
        offending.push(feature);
    }
}

/// Walks the chain below a SQLite compound leaf's `project` node, naming
/// every unsupported feature it finds by its SQL clause name (spec §4.H:
/// "SQLite leaves must not contain traversals, subquery predicates,
/// vector-similarity predicates, GROUP BY, HAVING, or per-leaf ORDER BY/
/// LIMIT/OFFSET").
fn collect_offending_features(node: &LogicalPlanNode, offending: &mut Vec<&'static str>) {
    match node {
        LogicalPlanNode::Join(n) => {
            push_unique(offending, "traversals");
            collect_offending_features(n.input.as_ref(), offending);
        }
        LogicalPlanNode::RecursiveExpand(n) => {
            push_unique(offending, "traversals");
            collect_offending_features(n.input.as_ref(), offending);
        }
        LogicalPlanNode::VectorKnn(n) => {
            push_unique(offending, "vector-similarity predicates");
            collect_offending_features(n.input.as_ref(), offending);
        }
        LogicalPlanNode::Aggregate(n) => {
            if !n.group_by.is_empty() {
                push_unique(offending, "GROUP BY");
            }
            if n.having.is_some() {
                push_unique(offending, "HAVING");
            }
            collect_offending_features(n.input.as_ref(), offending);
        }
        LogicalPlanNode::Sort(n) => {
            push_unique(offending, "ORDER BY");
            collect_offending_features(n.input.as_ref(), offending);
        }
        LogicalPlanNode::LimitOffset(n) => {
            push_unique(offending, "LIMIT/OFFSET");
            collect_offending_features(n.input.as_ref(), offending);
        }
        LogicalPlanNode::Filter(n) => {
            if predicate_contains_subquery(&n.predicate) {
                push_unique(offending, "subquery predicates");
            }
            collect_offending_features(n.input.as_ref(), offending);
        }
        LogicalPlanNode::Project(n) => collect_offending_features(n.input.as_ref(), offending),
        LogicalPlanNode::Scan(_) | LogicalPlanNode::SetOp(_) => {}
    }
}

/// A SQLite compound leaf may only be a bare scan, optionally with a single
/// filter over the start alias — no traversal, no aggregation, no ordering
/// or pagination of its own.
fn leaf_scan_and_filter(project: &ProjectNode) -> CompileResult<(&ScanNode, Option<&PredicateExpression>)> {
    match project.input.as_ref() {
        LogicalPlanNode::Scan(scan) => Ok((scan, None)),
        LogicalPlanNode::Filter(filter) => match filter.input.as_ref() {
            LogicalPlanNode::Scan(scan) => Ok((scan, Some(&filter.predicate))),
            other => Err(CompileError::invariant(
                "set_op_emitter",
                format!("unexpected node under a sqlite compound leaf's filter: {other:?}"),
            )),
        },
        other => Err(CompileError::invariant(
            "set_op_emitter",
            format!("unexpected node under a sqlite compound leaf: {other:?}"),
        )),
    }
}

fn validate_sqlite_leaf(project: &ProjectNode) -> CompileResult<()> {
    let mut offending: Vec<&'static str> = Vec::new();
    collect_offending_features(project.input.as_ref(), &mut offending);

    if offending.is_empty() {
        Ok(())
    } else {
        Err(CompileError::unsupported(format!(
            "sqlite compound set operations do not support: {}",
            offending.join(", ")
        )))
    }
}

/// Flattens a (possibly nested) set-op tree into an ordered list of leaf
/// `project` nodes and the operators joining them, left to right.
fn flatten_sqlite_leaves<'a>(
    node: &'a LogicalPlanNode,
    leaves: &mut Vec<&'a ProjectNode>,
    operators: &mut Vec<SetOperator>,
) -> CompileResult<()> {
    match node {
        LogicalPlanNode::SetOp(set_op) => {
            flatten_sqlite_leaves(set_op.left.as_ref(), leaves, operators)?;
            operators.push(set_op.operator);
            flatten_sqlite_leaves(set_op.right.as_ref(), leaves, operators)?;
            Ok(())
        }
        LogicalPlanNode::Project(project) => {
            validate_sqlite_leaf(project)?;
            leaves.push(project);
            Ok(())
        }
        other => Err(CompileError::unsupported(format!(
            "sqlite compound set operations do not support leaf shape: {other:?}"
        ))),
    }
}

fn temporal_now(mode: &TemporalMode, dialect: &dyn DialectAdapter) -> String {
    match mode {
        TemporalMode::AsOf { timestamp } => format!("'{}'", timestamp.to_rfc3339()),
        _ => dialect.current_timestamp(),
    }
}

fn leaf_cte(prefixed_alias: &str, scan: &ScanNode, filter: Option<&PredicateExpression>, dialect: &dyn DialectAdapter) -> CompileResult<Cte> {
    let now_sql = temporal_now(&scan.temporal_mode, dialect);
    let temporal = temporal_filter_fragment("t", &scan.temporal_mode, &now_sql).sql.replace("t.", "");
    let kinds: Vec<String> = scan.kinds.iter().map(|k| format!("'{k}'")).collect();

    let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::Bare);
    let mut clauses = vec![
        format!("graph_id = '{}'", scan.graph_id),
        format!("kind IN ({})", kinds.join(", ")),
        temporal,
    ];
    if let Some(predicate) = filter {
        clauses.push(predicate_compiler::compile(predicate, &ctx)?);
    }

    Ok(Cte {
        name: format!("cte_{prefixed_alias}"),
        body: format!(
            "SELECT id, kind, props FROM {NODE_TABLE} WHERE {}",
            clauses.join(" AND ")
        ),
    })
}

fn leaf_select_items(project: &ProjectNode, prefixed_alias: &str, dialect: &dyn DialectAdapter) -> Vec<String> {
    project
        .projection
        .iter()
        .map(|field| {
            let expr = if let Some(pointer) = &field.pointer {
                dialect.json_extract_text(&format!("cte_{prefixed_alias}.props"), &pointer.encode())
            } else {
                format!("cte_{prefixed_alias}.id")
            };
            format!("{expr} AS {}", field.output_name)
        })
        .collect()
}

fn emit_sqlite_compound(shape: &Shape<'_>, dialect: &dyn DialectAdapter) -> CompileResult<String> {
    let mut leaves = Vec::new();
    let mut operators = Vec::new();
    let root = LogicalPlanNode::SetOp(shape.set_op.clone());
    flatten_sqlite_leaves(&root, &mut leaves, &mut operators)?;
    debug_assert_eq!(operators.len() + 1, leaves.len());

    let mut ctes = Vec::new();
    let mut leaf_selects = Vec::new();
    for (i, project) in leaves.iter().enumerate() {
        let (scan, filter) = leaf_scan_and_filter(project)?;
        let prefixed_alias = format!("q{i}_alias");
        ctes.push(leaf_cte(&prefixed_alias, scan, filter, dialect)?);
        let items = leaf_select_items(project, &prefixed_alias, dialect);
        leaf_selects.push(format!("SELECT {} FROM cte_{prefixed_alias}", items.join(", ")));
    }

    let mut body = leaf_selects[0].clone();
    for (operator, select) in operators.iter().zip(leaf_selects.iter().skip(1)) {
        body.push_str(&format!(" {} {select}", operator_keyword(*operator)));
    }

    let mut sql = format!("{} {body}", render_ctes(&ctes));
    sql.push_str(&suffix_clauses(shape, &leaves[0].projection)?);
    Ok(sql)
}

pub fn emit(plan: &LogicalPlanNode, dialect: &dyn DialectAdapter) -> CompileResult<String> {
    let shape = inspect(plan)?;
    match dialect.set_operation_strategy() {
        SetOperationStrategy::StandardParenthesized => emit_standard_parenthesized(&shape, dialect),
        SetOperationStrategy::SqliteCompound => emit_sqlite_compound(&shape, dialect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{QueryAst, QueryLeaf, SetOperationAst, StartSpec};
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::plan::lower;

    fn leaf(alias: &str, kind: &str) -> QueryLeaf {
        let mut leaf = QueryLeaf::new(
            "g1".into(),
            StartSpec {
                alias: alias.to_string(),
                kinds: vec![kind.to_string()],
                include_sub_classes: false,
            },
        );
        leaf.projection.push(ProjectionField {
            alias: alias.to_string(),
            pointer: None,
            output_name: "id".into(),
            aggregate: None,
        });
        leaf
    }

    fn union_ast() -> QueryAst {
        QueryAst::SetOperation(SetOperationAst {
            operator: SetOperator::Union,
            left: Box::new(QueryAst::Leaf(leaf("p", "Person"))),
            right: Box::new(QueryAst::Leaf(leaf("q", "Organization"))),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        })
    }

    #[test]
    fn postgres_parenthesizes_each_leaf() {
        let plan = lower(&union_ast()).unwrap();
        let sql = super::super::emit(&plan, &PostgresDialect).unwrap();
        assert!(sql.starts_with('('));
        assert!(sql.contains(") UNION ("));
    }

    #[test]
    fn sqlite_lifts_leaves_into_one_with_clause() {
        let plan = lower(&union_ast()).unwrap();
        let sql = super::super::emit(&plan, &SqliteDialect).unwrap();
        assert!(sql.starts_with("WITH "));
        assert!(sql.contains("cte_q0_alias"));
        assert!(sql.contains("cte_q1_alias"));
        assert!(sql.contains(" UNION "));
        assert!(!sql.contains('('));
    }

    #[test]
    fn sqlite_rejects_group_by_in_leaf() {
        let mut grouped_leaf = leaf("p", "Person");
        grouped_leaf.group_by.push(crate::ast::FieldRef::new(
            "p",
            crate::pointer::JsonPointer::parse("/age").unwrap(),
            crate::ast::ValueType::Number,
        ));
        let ast = QueryAst::SetOperation(SetOperationAst {
            operator: SetOperator::Union,
            left: Box::new(QueryAst::Leaf(grouped_leaf)),
            right: Box::new(QueryAst::Leaf(leaf("q", "Organization"))),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        });
        let plan = lower(&ast).unwrap();
        let err = super::super::emit(&plan, &SqliteDialect).unwrap_err();
        assert!(err.to_string().contains("GROUP BY"));
    }

    #[test]
    fn set_operation_order_by_unknown_column_is_unsupported() {
        let ast = QueryAst::SetOperation(SetOperationAst {
            operator: SetOperator::Union,
            left: Box::new(QueryAst::Leaf(leaf("p", "Person"))),
            right: Box::new(QueryAst::Leaf(leaf("q", "Organization"))),
            order_by: vec![OrderByField {
                alias: "not_a_column".into(),
                pointer: None,
                direction: crate::ast::OrderDirection::Asc,
            }],
            limit: None,
            offset: None,
        });
        // AST-level validation already rejects this before lowering.
        assert!(lower(&ast).is_err());
    }
}
