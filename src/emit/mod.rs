//! SQL emitters: the three plan-shape-specific code generators described in
//! spec §4.H. [`emit`] is the single entry point and dispatches to the right
//! one based on the shape of the plan it's given.

mod recursive;
mod set_op;
mod standard;

use crate::ast::{OrderByField, OrderDirection};
use crate::dialect::DialectAdapter;
use crate::error::CompileResult;
use crate::plan::LogicalPlanNode;

pub const NODE_TABLE: &str = "typegraph_nodes";
pub const EDGE_TABLE: &str = "typegraph_edges";

/// One `WITH`-clause entry.
#[derive(Debug, Clone)]
pub struct Cte {
    pub name: String,
    pub body: String,
}

fn render_ctes(ctes: &[Cte]) -> String {
    let parts: Vec<String> = ctes.iter().map(|c| format!("{} AS ({})", c.name, c.body)).collect();
    format!("WITH {}", parts.join(", "))
}

/// NULL ordering is emulated uniformly across dialects: `(col IS NULL)
/// ASC/DESC, col DIR`, with `ASC` defaulting to `NULLS LAST` and `DESC` to
/// `NULLS FIRST`.
fn order_by_clause(fields: &[OrderByField], column_for: impl Fn(&OrderByField) -> String) -> String {
    let parts: Vec<String> = fields
        .iter()
        .map(|field| {
            let column = column_for(field);
            let (null_rank_dir, value_dir) = match field.direction {
                OrderDirection::Asc => ("ASC", "ASC"),
                OrderDirection::Desc => ("DESC", "DESC"),
            };
            format!("({column} IS NULL) {null_rank_dir}, {column} {value_dir}")
        })
        .collect();
    parts.join(", ")
}

fn limit_offset_clause(limit: Option<u64>, offset: Option<u64>) -> String {
    let mut clause = String::new();
    if let Some(limit) = limit {
        clause.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = offset {
        clause.push_str(&format!(" OFFSET {offset}"));
    }
    clause
}

/// Compiles a logical plan into a SQL string, selecting the standard,
/// recursive, or set-operation emitter based on the plan's shape.
pub fn emit(plan: &LogicalPlanNode, dialect: &dyn DialectAdapter) -> CompileResult<String> {
    if plan.contains("set_op") {
        set_op::emit(plan, dialect)
    } else if plan.contains("recursive_expand") {
        recursive::emit(plan, dialect)
    } else {
        standard::emit(plan, dialect)
    }
}
