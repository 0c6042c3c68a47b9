//! Recursive emitter: plans whose traversal carries a `variableLength` and
//! lowered to a single `recursive_expand` node (spec §4.H "Recursive
//! emitter"). Built the same way the standard emitter is — a plan-shape
//! inspector followed by CTE assembly — but the traversal itself becomes one
//! `WITH RECURSIVE` CTE instead of a chain of per-alias joins.

use crate::ast::{PredicateExpression, TemporalMode};
use crate::compiler::passes::temporal_filter_fragment;
use crate::dialect::DialectAdapter;
use crate::error::{CompileError, CompileResult};
use crate::plan::{
    AggregateNode, LimitOffsetNode, LogicalPlanNode, ProjectNode, RecursiveExpandNode, ScanNode,
    SortNode, VectorKnnNode,
};
use crate::predicate_compiler::{self, CteColumnPrefix, PredicateCompilerContext};

use super::{limit_offset_clause, order_by_clause, render_ctes, Cte, EDGE_TABLE, NODE_TABLE};

const RECURSIVE_CTE: &str = "recursive_cte";

/// Mirrors `standard::Shape`, but the chain root below `project` must bottom
/// out at exactly one `recursive_expand` node, with an optional leading
/// filter on the start alias.
struct Shape<'a> {
    project: &'a ProjectNode,
    limit_offset: Option<&'a LimitOffsetNode>,
    sort: Option<&'a SortNode>,
    aggregate: Option<&'a AggregateNode>,
    vector_knn: Option<&'a VectorKnnNode>,
    recursive: &'a RecursiveExpandNode,
    start_scan: &'a ScanNode,
    start_filter: Option<&'a PredicateExpression>,
    /// Filters stacked directly above `recursive_expand`, keyed by the alias
    /// (`edgeAlias` or `nodeAlias`) they target — lowering applies the edge
    /// filter first, then the node filter, so up to two may be present.
    post_filters: Vec<(&'a str, &'a PredicateExpression)>,
}

fn filter_for<'a>(filters: &[(&'a str, &'a PredicateExpression)], alias: &str) -> Option<&'a PredicateExpression> {
    filters.iter().find(|(a, _)| *a == alias).map(|(_, p)| *p)
}

fn inspect(plan: &LogicalPlanNode) -> CompileResult<Shape<'_>> {
    let LogicalPlanNode::Project(project) = plan else {
        return Err(CompileError::invariant("recursive_emitter", "plan root is not project"));
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

    let mut post_filters = Vec::new();
    while let LogicalPlanNode::Filter(f) = cursor {
        post_filters.push((f.alias.as_str(), &f.predicate));
        cursor = f.input.as_ref();
    }

    let LogicalPlanNode::RecursiveExpand(recursive) = cursor else {
        return Err(CompileError::invariant(
            "recursive_emitter",
            "plan does not contain recursive_expand at the expected position",
        ));
    };

    let mut start_filter = None;
    let mut cursor = recursive.input.as_ref();
    if let LogicalPlanNode::Filter(f) = cursor {
        start_filter = Some(&f.predicate);
        cursor = f.input.as_ref();
    }

    let LogicalPlanNode::Scan(start_scan) = cursor else {
        return Err(CompileError::invariant(
            "recursive_emitter",
            "recursive_expand's input is not a start scan",
        ));
    };

    Ok(Shape {
        project,
        limit_offset,
        sort,
        aggregate,
        vector_knn,
        recursive,
        start_scan,
        start_filter,
        post_filters,
    })
}

fn temporal_now(mode: &TemporalMode, dialect: &dyn DialectAdapter) -> String {
    match mode {
        TemporalMode::AsOf { timestamp } => format!("'{}'", timestamp.to_rfc3339()),
        _ => dialect.current_timestamp(),
    }
}

fn node_scope_cte(
    name: &str,
    graph_id: Option<&str>,
    kinds: &[String],
    temporal_mode: &TemporalMode,
    filter: Option<&PredicateExpression>,
    dialect: &dyn DialectAdapter,
) -> CompileResult<Cte> {
    let now_sql = temporal_now(temporal_mode, dialect);
    let temporal = temporal_filter_fragment("t", temporal_mode, &now_sql).sql.replace("t.", "");
    let kind_list: Vec<String> = kinds.iter().map(|k| format!("'{k}'")).collect();

    let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::Bare);
    let mut clauses = vec![format!("kind IN ({})", kind_list.join(", ")), temporal];
    if let Some(graph_id) = graph_id {
        clauses.push(format!("graph_id = '{graph_id}'"));
    }
    if let Some(predicate) = filter {
        clauses.push(predicate_compiler::compile(predicate, &ctx)?);
    }

    Ok(Cte {
        name: format!("cte_{name}"),
        body: format!(
            "SELECT id, kind, props FROM {NODE_TABLE} WHERE {}",
            clauses.join(" AND ")
        ),
    })
}

fn edge_scope_cte(
    alias: &str,
    kinds: &[String],
    temporal_mode: &TemporalMode,
    filter: Option<&PredicateExpression>,
    dialect: &dyn DialectAdapter,
) -> CompileResult<Cte> {
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
            "SELECT id, from_id, from_kind, to_id, to_kind, props FROM {EDGE_TABLE} WHERE {}",
            clauses.join(" AND ")
        ),
    })
}

/// Builds the `WITH RECURSIVE` member itself: a base case seeding depth 1
/// from the start alias, unioned with a step case that walks one more hop
/// while enforcing the dialect's cycle guard and, if bounded, `maxDepth`.
fn recursive_member(recursive: &RecursiveExpandNode, start_alias: &str, dialect: &dyn DialectAdapter) -> String {
    let edge = &recursive.edge_alias;
    let seed = dialect.path_seed(&format!("{edge}.to_id"));
    let step_path = dialect.path_append("r.path", &format!("{edge}.to_id"));
    let cycle_guard = dialect.cycle_guard("r.path", &format!("{edge}.to_id"));

    let base = format!(
        "SELECT {start_alias}.id AS root_id, {edge}.to_id AS id, 1 AS depth, {seed} AS path \
         FROM cte_{start_alias} AS {start_alias} JOIN cte_{edge} AS {edge} ON {edge}.from_id = {start_alias}.id"
    );

    let mut step = format!(
        "SELECT r.root_id, {edge}.to_id, r.depth + 1, {step_path} \
         FROM {RECURSIVE_CTE} r JOIN cte_{edge} AS {edge} ON {edge}.from_id = r.id \
         WHERE {cycle_guard}"
    );
    if let Some(max_depth) = recursive.max_depth {
        step.push_str(&format!(" AND r.depth + 1 <= {max_depth}"));
    }

    format!("{base} UNION ALL {step}")
}

pub fn emit(plan: &LogicalPlanNode, dialect: &dyn DialectAdapter) -> CompileResult<String> {
    let shape = inspect(plan)?;
    let recursive = shape.recursive;

    let mut ctes = vec![node_scope_cte(
        &shape.start_scan.alias,
        Some(shape.start_scan.graph_id.as_str()),
        &shape.start_scan.kinds,
        &shape.start_scan.temporal_mode,
        shape.start_filter,
        dialect,
    )?];
    ctes.push(edge_scope_cte(
        &recursive.edge_alias,
        &recursive.edge_kinds,
        &shape.start_scan.temporal_mode,
        filter_for(&shape.post_filters, &recursive.edge_alias),
        dialect,
    )?);
    ctes.push(Cte {
        name: RECURSIVE_CTE.to_string(),
        body: recursive_member(recursive, &shape.start_scan.alias, dialect),
    });
    ctes.push(node_scope_cte(
        &recursive.node_alias,
        None,
        &recursive.node_kinds,
        &shape.start_scan.temporal_mode,
        filter_for(&shape.post_filters, &recursive.node_alias),
        dialect,
    )?);

    let node_alias = &recursive.node_alias;
    let node_cte = format!("cte_{node_alias}");
    let from = format!("{RECURSIVE_CTE} JOIN {node_cte} ON {node_cte}.id = {RECURSIVE_CTE}.id");

    let mut select_items = Vec::new();
    for field in &shape.project.projection {
        let expr = if Some(field.alias.as_str()) == recursive.depth_alias.as_deref() {
            format!("{RECURSIVE_CTE}.depth")
        } else if Some(field.alias.as_str()) == recursive.path_alias.as_deref() {
            format!("{RECURSIVE_CTE}.path")
        } else if let Some(agg) = field.aggregate {
            let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::PostCte);
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

    let mut sql = format!("{} SELECT {} FROM {from}", render_ctes(&ctes), select_items.join(", "));

    let mut depth_filter = vec![format!("{RECURSIVE_CTE}.depth >= {}", recursive.min_depth)];
    if let Some(max_depth) = recursive.max_depth {
        depth_filter.push(format!("{RECURSIVE_CTE}.depth <= {max_depth}"));
    }
    sql.push_str(&format!(" WHERE {}", depth_filter.join(" AND ")));

    if let Some(aggregate) = shape.aggregate {
        if !aggregate.group_by.is_empty() {
            let columns: Vec<String> = aggregate
                .group_by
                .iter()
                .map(|f| dialect.json_extract_text(&format!("cte_{}.props", f.alias), &f.pointer.encode()))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", columns.join(", ")));
        }
        if let Some(having) = &aggregate.having {
            let ctx = PredicateCompilerContext::new(dialect).with_prefix(CteColumnPrefix::PostCte);
            sql.push_str(&format!(" HAVING {}", predicate_compiler::compile(having, &ctx)?));
        }
    }

    if let Some(vector) = shape.vector_knn {
        let distance = dialect.vector_distance(
            &format!("cte_{}.props", vector.field.alias),
            &vector.query_embedding,
            vector.metric,
        );
        sql.push_str(&format!(" ORDER BY {distance} ASC"));
    } else if let Some(sort) = shape.sort {
        let clause = order_by_clause(&sort.order_by, |field| {
            if Some(field.alias.as_str()) == recursive.depth_alias.as_deref() {
                format!("{RECURSIVE_CTE}.depth")
            } else if let Some(pointer) = &field.pointer {
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
    use crate::ast::{QueryAst, QueryLeaf, StartSpec, Traversal, VariableLength};
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::plan::lower;

    fn leaf_with_recursive() -> QueryLeaf {
        let mut leaf = QueryLeaf::new(
            "g1".into(),
            StartSpec {
                alias: "p".into(),
                kinds: vec!["Person".into()],
                include_sub_classes: false,
            },
        );
        leaf.traversals.push(Traversal {
            edge_alias: "knows".into(),
            edge_kinds: vec!["Knows".into()],
            node_alias: "q".into(),
            node_kinds: vec!["Person".into()],
            include_sub_classes: false,
            optional: false,
            variable_length: Some(VariableLength {
                min_depth: 1,
                max_depth: Some(3),
                collect_path: false,
                path_alias: None,
                depth_alias: None,
            }),
        });
        leaf.projection.push(crate::ast::ProjectionField {
            alias: "q".into(),
            pointer: None,
            output_name: "id".into(),
            aggregate: None,
        });
        leaf
    }

    #[test]
    fn emits_recursive_cte_with_depth_bound() {
        let plan = lower(&QueryAst::Leaf(leaf_with_recursive())).unwrap();
        let sql = emit(&plan, &SqliteDialect).unwrap();
        assert!(sql.contains("WITH RECURSIVE recursive_cte AS"));
        assert!(sql.contains("UNION ALL"));
        assert!(sql.contains("depth + 1 <= 3"));
        assert!(sql.contains("recursive_cte.depth >= 1"));
    }

    #[test]
    fn cycle_guard_differs_per_dialect() {
        let plan = lower(&QueryAst::Leaf(leaf_with_recursive())).unwrap();
        let sqlite_sql = emit(&plan, &SqliteDialect).unwrap();
        let postgres_sql = emit(&plan, &PostgresDialect).unwrap();
        assert!(sqlite_sql.contains("INSTR(r.path"));
        assert!(postgres_sql.contains("!= ALL(r.path)"));
    }
}
