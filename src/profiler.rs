//! Query Profiler (component K, optional): records per-alias property access
//! patterns across compiled queries and suggests index hints from them.
//!
//! Gated behind the `profiler` feature (on by default). Kept entirely outside
//! [`crate::plan::lower`]/[`crate::emit::emit`] so compilation stays the pure
//! function spec §8 requires — a caller opts in by calling [`record_query`]
//! alongside a compile call, not by threading a profiler through it.

#![cfg(feature = "profiler")]

use std::collections::HashMap;
use std::sync::Mutex;

use crate::ast::predicate::PredicateExpression;
use crate::ast::{FieldRef, QueryAst, QueryLeaf};

/// Which clause a recorded access came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Filter,
    Projection,
    Sort,
    GroupBy,
}

/// An index recommendation derived from observed access counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSuggestion {
    pub alias: String,
    pub pointer: String,
    pub filter_count: u64,
    pub sort_count: u64,
    pub group_by_count: u64,
    pub reason: String,
}

/// Per-store counters, explicitly not safe to share across stores (spec §5)
/// — callers attach one profiler instance per backend connection.
pub trait QueryProfiler: Send + Sync {
    fn record_access(&self, alias: &str, pointer: &str, access: AccessKind);
    fn suggest_indexes(&self, alias: &str) -> Vec<IndexSuggestion>;
    fn reset(&self);
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    filter: u64,
    projection: u64,
    sort: u64,
    group_by: u64,
}

/// Default in-memory [`QueryProfiler`]. A real deployment might back this
/// with a backend-side counter table instead; this crate only needs the
/// trait boundary plus a usable default.
#[derive(Default)]
pub struct InMemoryProfiler {
    counters: Mutex<HashMap<(String, String), Counters>>,
}

impl InMemoryProfiler {
    pub fn new() -> Self {
        Self::default()
    }
}

const FILTER_SUGGESTION_THRESHOLD: u64 = 3;

impl QueryProfiler for InMemoryProfiler {
    fn record_access(&self, alias: &str, pointer: &str, access: AccessKind) {
        let mut counters = self.counters.lock().expect("profiler mutex poisoned");
        let entry = counters.entry((alias.to_string(), pointer.to_string())).or_default();
        match access {
            AccessKind::Filter => entry.filter += 1,
            AccessKind::Projection => entry.projection += 1,
            AccessKind::Sort => entry.sort += 1,
            AccessKind::GroupBy => entry.group_by += 1,
        }
    }

    fn suggest_indexes(&self, alias: &str) -> Vec<IndexSuggestion> {
        let counters = self.counters.lock().expect("profiler mutex poisoned");
        let mut suggestions: Vec<IndexSuggestion> = counters
            .iter()
            .filter(|((a, _), _)| a == alias)
            .filter_map(|((_, pointer), c)| {
                let reason = if c.filter >= FILTER_SUGGESTION_THRESHOLD {
                    Some(format!("filtered {} times", c.filter))
                } else if c.sort > 0 {
                    Some("used as a sort key".to_string())
                } else if c.group_by > 0 {
                    Some("used as a group-by key".to_string())
                } else {
                    None
                };
                reason.map(|reason| IndexSuggestion {
                    alias: alias.to_string(),
                    pointer: pointer.clone(),
                    filter_count: c.filter,
                    sort_count: c.sort,
                    group_by_count: c.group_by,
                    reason,
                })
            })
            .collect();
        suggestions.sort_by(|a, b| b.filter_count.cmp(&a.filter_count).then_with(|| a.pointer.cmp(&b.pointer)));
        suggestions
    }

    fn reset(&self) {
        self.counters.lock().expect("profiler mutex poisoned").clear();
    }
}

fn record_field(profiler: &dyn QueryProfiler, field: &FieldRef, access: AccessKind) {
    profiler.record_access(&field.alias, &field.pointer.encode(), access);
}

/// Collects every field a predicate expression directly reads, recursing
/// through `and`/`or`/`not`. Subqueries under `exists`/`inSubquery` are a
/// separate [`QueryAst`] with their own alias scope — record those
/// separately via a recursive [`record_query`] call if desired.
fn record_predicate(profiler: &dyn QueryProfiler, expr: &PredicateExpression, access: AccessKind) {
    match expr {
        PredicateExpression::Comparison { field, .. }
        | PredicateExpression::StringOp { field, .. }
        | PredicateExpression::NullCheck { field, .. }
        | PredicateExpression::Between { field, .. }
        | PredicateExpression::ArrayOp { field, .. }
        | PredicateExpression::ObjectOp { field, .. } => record_field(profiler, field, access),
        PredicateExpression::AggregateComparison(agg) => {
            if let Some(field) = &agg.field {
                record_field(profiler, field, access);
            }
        }
        PredicateExpression::VectorSimilarity(similarity) => record_field(profiler, &similarity.field, access),
        PredicateExpression::Exists { .. } | PredicateExpression::InSubquery { .. } => {}
        PredicateExpression::And(exprs) | PredicateExpression::Or(exprs) => {
            for expr in exprs {
                record_predicate(profiler, expr, access);
            }
        }
        PredicateExpression::Not(inner) => record_predicate(profiler, inner, access),
    }
}

fn record_leaf(profiler: &dyn QueryProfiler, leaf: &QueryLeaf) {
    for predicate in &leaf.predicates {
        record_predicate(profiler, &predicate.expr, AccessKind::Filter);
    }
    if let Some(having) = &leaf.having {
        record_predicate(profiler, having, AccessKind::Filter);
    }
    for field in &leaf.group_by {
        record_field(profiler, field, AccessKind::GroupBy);
    }
    for field in &leaf.order_by {
        if let Some(pointer) = &field.pointer {
            profiler.record_access(&field.alias, &pointer.encode(), AccessKind::Sort);
        }
    }
    for field in &leaf.projection {
        if let Some(pointer) = &field.pointer {
            profiler.record_access(&field.alias, &pointer.encode(), AccessKind::Projection);
        }
    }
}

/// Walks a query AST and records every property access it makes, by clause.
/// Call this alongside (not instead of) a normal compile — it has no effect
/// on the compiled SQL.
pub fn record_query(profiler: &dyn QueryProfiler, ast: &QueryAst) {
    match ast {
        QueryAst::Leaf(leaf) => record_leaf(profiler, leaf),
        QueryAst::SetOperation(set_op) => {
            record_query(profiler, set_op.left.as_ref());
            record_query(profiler, set_op.right.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::predicate::ComparisonOp;
    use crate::ast::value::{PredicateValue, ScalarValue, ValueType};
    use crate::ast::{Predicate, StartSpec, TargetType};
    use crate::pointer::JsonPointer;

    fn leaf_filtering_name() -> QueryLeaf {
        let mut leaf = QueryLeaf::new(
            "g1".into(),
            StartSpec {
                alias: "p".into(),
                kinds: vec!["Person".into()],
                include_sub_classes: false,
            },
        );
        leaf.predicates.push(Predicate {
            target_alias: "p".into(),
            target_type: TargetType::Node,
            expr: PredicateExpression::Comparison {
                field: FieldRef::new("p", JsonPointer::parse("/name").unwrap(), ValueType::String),
                op: ComparisonOp::Eq,
                value: PredicateValue::Scalar(ScalarValue::String("Alice".into())),
            },
        });
        leaf
    }

    #[test]
    fn repeated_filter_access_crosses_suggestion_threshold() {
        let profiler = InMemoryProfiler::new();
        for _ in 0..3 {
            record_query(&profiler, &QueryAst::Leaf(leaf_filtering_name()));
        }
        let suggestions = profiler.suggest_indexes("p");
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].pointer, "/name");
        assert_eq!(suggestions[0].filter_count, 3);
    }

    #[test]
    fn below_threshold_with_no_sort_or_group_by_yields_no_suggestion() {
        let profiler = InMemoryProfiler::new();
        record_query(&profiler, &QueryAst::Leaf(leaf_filtering_name()));
        assert!(profiler.suggest_indexes("p").is_empty());
    }

    #[test]
    fn reset_clears_all_counters() {
        let profiler = InMemoryProfiler::new();
        for _ in 0..3 {
            record_query(&profiler, &QueryAst::Leaf(leaf_filtering_name()));
        }
        profiler.reset();
        assert!(profiler.suggest_indexes("p").is_empty());
    }
}
