//! Standard emitter: scan/filter/join chains with no recursion and no set
//! operation, terminating in a `project` (spec §4.H "Standard emitter").

use std::collections::HashMap;

use crate::ast::{PredicateExpression, TemporalMode};
use crate::compiler::passes::temporal_filter_fragment;
use crate::dialect::DialectAdapter;
use crate::error::{CompileError, CompileResult};
use crate::plan::{
    AggregateNode, FilterNode, JoinKind, JoinNode, LimitOffsetNode, LogicalPlanNode, ProjectNode,
    ScanNode, SortNode, VectorKnnNode,
};
use crate::predicate_compiler::{self, CteColumnPrefix, PredicateCompilerContext};

use super::{limit_offset_clause, order_by_clause, render_ctes, Cte, EDGE_TABLE, NODE_TABLE};

enum RawNode<'a> {
    Scan(&'a ScanNode),
    Filter(&'a FilterNode),
    Join(&'a JoinNode),
}

/// The plan-shape inspector: asserts the clauses present on the plan line up
/// with the node kinds actually present, then returns the pieces the rest of
/// this module needs.
struct Shape<'a> {
    project: &'a ProjectNode,
    limit_offset: Option<&'a LimitOffsetNode>,
    sort: Option<&'a SortNode>,
    aggregate: Option<&'a AggregateNode>,
    vector_knn: Option<&'a VectorKnnNode>,
    chain_root: &'a LogicalPlanNode,
}

fn inspect(plan: &LogicalPlanNode) -> CompileResult<Shape<'_>> {
    let LogicalPlanNode::Project(project) = plan else {
        return Err(CompileError::invariant("standard_emitter", "plan root is not project"));
    };

    let mut cursor = project.input.as_ref();
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
    let mut aggregate = None;
    if let LogicalPlanNode::Aggregate(n) = cursor {
        aggregate = Some(n);
        cursor = n.input.as_ref();
    }
    let mut vector_knn = None;
    if let LogicalPlanNode::VectorKnn(n) = cursor {
        vector_knn = Some(n);
        cursor = n.input.as_ref();
    }

    if limit_offset.is_none() && plan.contains("limit_offset") {
        return Err(CompileError::invariant(
            "standard_emitter",
            "plan contains limit_offset but it is not in the expected position",
        ));
    }
    if sort.is_none() && plan.contains("sort") && vector_knn.is_none() {
        return Err(CompileError::invariant(
            "standard_emitter",
            "plan contains sort but it is not in the expected position",
        ));
    }

    Ok(Shape {
        project,
        limit_offset,
        sort,
        aggregate,
        vector_knn,
        chain_root: cursor,
    })
}

fn flatten_chain(root: &LogicalPlanNode) -> CompileResult<Vec<RawNode<'_>>> {
    let mut raw = Vec::new();
    let mut cursor = root;
    loop {
        match cursor {
            LogicalPlanNode::Scan(n) => {
                raw.push(RawNode::Scan(n));
                break;
            }
            LogicalPlanNode::Filter(n) => {
                raw.push(RawNode::Filter(n));
                cursor = n.input.as_ref();
            }
            LogicalPlanNode::Join(n) => {
                raw.push(RawNode::Join(n));
                cursor = n.input.as_ref();
            }
            LogicalPlanNode::RecursiveExpand(_) => {
                return Err(CompileError::invariant(
                    "standard_emitter",
                    "recursive_expand must be handled by the recursive emitter",
                ))
            }
            other => {
                return Err(CompileError::invariant(
                    "standard_emitter",
                    format!("unexpected node in scan/join chain: {other:?}"),
                ))
            }
        }
    }
    raw.reverse();
    Ok(raw)
}

fn filters_by_alias<'a>(raw: &[RawNode<'a>]) -> HashMap<&'a str, &'a PredicateExpression> {
    raw.iter()
        .filter_map(|n| match n {
            RawNode::Filter(f) => Some((f.alias.as_str(), &f.predicate)),
            _ => None,
        })
        .collect()
}

fn temporal_now(mode: &TemporalMode, dialect: &dyn DialectAdapter) -> String {
    match mode {
        TemporalMode::AsOf { timestamp } => format!("'{}'", timestamp.to_rfc3339()),
        _ => dialect.current_timestamp(),
    }
}

fn scan_cte(node: &ScanNode, filter: Option<&PredicateExpression>, dialect: &dyn DialectAdapter) -> CompileResult<Cte> {
    let now_sql = temporal_now(&node.temporal_mode, dialect);
    let temporal = temporal_filter_fragment("t", &node.temporal_mode, &now_sql).sql.replace("t.", "");
    let kinds: Vec<String> = node.kinds.iter().map(|k| format!("'{k}'")).collect();

    let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::Bare);
    let mut clauses = vec![
        format!("graph_id = '{}'", node.graph_id),
        format!("kind IN ({})", kinds.join(", ")),
        temporal,
    ];
    if let Some(predicate) = filter {
        clauses.push(predicate_compiler::compile(predicate, &ctx)?);
    }

    Ok(Cte {
        name: format!("cte_{}", node.alias),
        body: format!(
            "SELECT id, kind, props FROM {NODE_TABLE} WHERE {}",
            clauses.join(" AND ")
        ),
    })
}

fn edge_cte(node: &JoinNode, temporal_mode: &TemporalMode, filter: Option<&PredicateExpression>, dialect: &dyn DialectAdapter) -> CompileResult<Cte> {
    let now_sql = temporal_now(temporal_mode, dialect);
    let temporal = temporal_filter_fragment("t", temporal_mode, &now_sql).sql.replace("t.", "");
    let kinds: Vec<String> = node.edge_kinds.iter().map(|k| format!("'{k}'")).collect();

    let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::Bare);
    let mut clauses = vec![format!("kind IN ({})", kinds.join(", ")), temporal];
    if let Some(predicate) = filter {
        clauses.push(predicate_compiler::compile(predicate, &ctx)?);
    }

    Ok(Cte {
        name: format!("cte_{}", node.edge_alias),
        body: format!(
            "SELECT id, from_id, from_kind, to_id, to_kind, props FROM {EDGE_TABLE} WHERE {}",
            clauses.join(" AND ")
        ),
    })
}

fn node_cte(alias: &str, kinds: &[String], temporal_mode: &TemporalMode, filter: Option<&PredicateExpression>, dialect: &dyn DialectAdapter) -> CompileResult<Cte> {
    let now_sql = temporal_now(temporal_mode, dialect);
    let temporal = temporal_filter_fragment("t", temporal_mode, &now_sql).sql.replace("t.", "");
    let kind_list: Vec<String> = kinds.iter().map(|k| format!("'{k}'")).collect();

    let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::Bare);
    let mut clauses = vec![format!("kind IN ({})", kind_list.join(", ")), temporal];
    if let Some(predicate) = filter {
        clauses.push(predicate_compiler::compile(predicate, &ctx)?);
    }

    Ok(Cte {
        name: format!("cte_{alias}"),
        body: format!(
            "SELECT id, kind, props FROM {NODE_TABLE} WHERE {}",
            clauses.join(" AND ")
        ),
    })
}

/// Produces the outer `FROM`/`JOIN` clause chaining the per-alias CTEs
/// together; this is where traversal direction and optionality actually
/// apply, rather than inside each CTE's own `WHERE`. CTEs are referenced by
/// their own `cte_<alias>` name throughout — no `AS` rebinding — since the
/// projection, GROUP BY, HAVING, and ORDER BY clauses built below all
/// address columns the same way.
fn from_clause(start_alias: &str, joins: &[&JoinNode]) -> String {
    let mut clause = format!("cte_{start_alias}");
    let mut prev_node_cte = format!("cte_{start_alias}");
    for join in joins {
        let join_kw = match join.kind {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        let edge_cte = format!("cte_{}", join.edge_alias);
        let node_cte = format!("cte_{}", join.node_alias);
        clause.push_str(&format!(" {join_kw} {edge_cte} ON {edge_cte}.from_id = {prev_node_cte}.id"));
        clause.push_str(&format!(" {join_kw} {node_cte} ON {node_cte}.id = {edge_cte}.to_id"));
        prev_node_cte = node_cte;
    }
    clause
}

pub fn emit(plan: &LogicalPlanNode, dialect: &dyn DialectAdapter) -> CompileResult<String> {
    let shape = inspect(plan)?;
    let raw = flatten_chain(shape.chain_root)?;
    let filters = filters_by_alias(&raw);

    let mut ctes = Vec::new();
    let mut joins: Vec<&JoinNode> = Vec::new();
    let mut start_alias = String::new();

    for node in &raw {
        match node {
            RawNode::Scan(scan) => {
                start_alias = scan.alias.clone();
                ctes.push(scan_cte(scan, filters.get(scan.alias.as_str()).copied(), dialect)?);
            }
            RawNode::Join(join) => {
                joins.push(join);
                // edges and joined-in nodes share the scan's temporal mode and
                // graph scoping; the deepest scan in the chain is authoritative.
                let temporal_mode = raw
                    .iter()
                    .find_map(|n| match n {
                        RawNode::Scan(s) => Some(s.temporal_mode.clone()),
                        _ => None,
                    })
                    .unwrap_or(TemporalMode::Current);
                ctes.push(edge_cte(
                    join,
                    &temporal_mode,
                    filters.get(join.edge_alias.as_str()).copied(),
                    dialect,
                )?);
                ctes.push(node_cte(
                    &join.node_alias,
                    &join.node_kinds,
                    &temporal_mode,
                    filters.get(join.node_alias.as_str()).copied(),
                    dialect,
                )?);
            }
            RawNode::Filter(_) => {}
        }
    }

    let from = from_clause(&start_alias, &joins);

    let mut select_items = Vec::new();
    for field in &shape.project.projection {
        let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::PostCte);
        let expr = if let Some(agg) = field.aggregate {
            let field_ref = field.pointer.as_ref().map(|p| {
                crate::ast::FieldRef::new(field.alias.clone(), p.clone(), crate::ast::ValueType::Number)
            });
            predicate_compiler::aggregate_sql(agg, field_ref.as_ref(), &ctx)
        } else if let Some(pointer) = &field.pointer {
            dialect.json_extract_text(&format!("cte_{}.props", field.alias), &pointer.encode())
        } else {
            format!("cte_{}.id", field.alias)
        };
        select_items.push(format!("{expr} AS {}", field.output_name));
    }
    if let Some(vector) = shape.vector_knn {
        let distance = dialect.vector_distance(
            &format!("cte_{}.props", vector.field.alias),
            &vector.query_embedding,
            vector.metric,
        );
        select_items.push(format!("{distance} AS __vector_distance"));
    }

    let mut sql = format!("{} SELECT {} FROM {from}", render_ctes(&ctes), select_items.join(", "));

    if let Some(aggregate) = shape.aggregate {
        if !aggregate.group_by.is_empty() {
            let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::PostCte);
            let columns: Vec<String> = aggregate
                .group_by
                .iter()
                .map(|f| dialect.json_extract_text(&format!("cte_{}.props", f.alias), &f.pointer.encode()))
                .collect();
            let _ = &ctx;
            sql.push_str(&format!(" GROUP BY {}", columns.join(", ")));
        }
        if let Some(having) = &aggregate.having {
            let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::PostCte);
            sql.push_str(&format!(" HAVING {}", predicate_compiler::compile(having, &ctx)?));
        }
    }

    if let Some(vector) = shape.vector_knn {
        let _ = vector;
        sql.push_str(" ORDER BY __vector_distance ASC");
    } else if let Some(sort) = shape.sort {
        let clause = order_by_clause(&sort.order_by, |field| {
            if let Some(pointer) = &field.pointer {
                dialect.json_extract_text(&format!("cte_{}.props", field.alias), &pointer.encode())
            } else {
                format!("cte_{}.id", field.alias)
            }
        });
        sql.push_str(&format!(" ORDER BY {clause}"));
    }

    if let Some(limit_offset) = shape.limit_offset {
        sql.push_str(&limit_offset_clause(limit_offset.limit, limit_offset.offset));
    }

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{QueryAst, QueryLeaf, StartSpec};
    use crate::dialect::SqliteDialect;
    use crate::plan::lower;

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
    fn simple_scan_emits_with_select_from() {
        let mut query = leaf("p");
        query.projection.push(crate::ast::ProjectionField {
            alias: "p".into(),
            pointer: None,
            output_name: "id".into(),
            aggregate: None,
        });
        let plan = lower(&QueryAst::Leaf(query)).unwrap();
        let sql = emit(&plan, &SqliteDialect).unwrap();
        assert!(sql.starts_with("WITH cte_p AS"));
        assert!(sql.contains("SELECT"));
        assert!(sql.contains("FROM cte_p"));
    }

    #[test]
    fn non_project_root_is_rejected() {
        let scan = LogicalPlanNode::Scan(ScanNode {
            id: crate::plan::PlanNodeId(0),
            alias: "p".into(),
            kinds: vec!["Person".into()],
            graph_id: "g1".into(),
            temporal_mode: TemporalMode::Current,
        });
        assert!(emit(&scan, &SqliteDialect).is_err());
    }
}
