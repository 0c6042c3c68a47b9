//! The stateless AST→AST/plan-fragment transforms described in spec §4.E.
//!
//! Each pass is a pure function over a [`QueryLeaf`] (or a piece of one) —
//! none of them touch a dialect or a schema, and none of them mutate their
//! input in place.

use std::collections::{HashMap, HashSet};

use crate::ast::{FieldRef, PredicateExpression, QueryLeaf, TemporalMode, Traversal, VectorSimilarity};
use crate::error::{CompileError, CompileResult};
use crate::pointer::JsonPointer;

/// Per-alias SQL fragment restricting row visibility, as produced by the
/// temporal filter pass. `sql` references `deleted_at`/`valid_from`/`valid_to`
/// directly — these are real columns, never JSON-pointer-addressed props.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalFilterFragment {
    pub alias: String,
    pub sql: String,
}

/// Builds the row-visibility SQL fragment for one alias. `now_sql` is the
/// dialect's rendering of "the current timestamp" (or, for `asOf`, the
/// literal timestamp itself) — this pass never picks a clock source.
pub fn temporal_filter_fragment(alias: &str, mode: &TemporalMode, now_sql: &str) -> TemporalFilterFragment {
    let qualified = |col: &str| format!("{alias}.{col}");
    let sql = match mode {
        TemporalMode::Current => format!(
            "{deleted} IS NULL AND {from} <= {now} AND ({to} IS NULL OR {to} > {now})",
            deleted = qualified("deleted_at"),
            from = qualified("valid_from"),
            to = qualified("valid_to"),
            now = now_sql,
        ),
        TemporalMode::IncludeEnded => format!(
            "{deleted} IS NULL AND {from} <= {now}",
            deleted = qualified("deleted_at"),
            from = qualified("valid_from"),
            now = now_sql,
        ),
        TemporalMode::IncludeTombstones => format!(
            "{from} <= {now} AND ({to} IS NULL OR {to} > {now})",
            from = qualified("valid_from"),
            to = qualified("valid_to"),
            now = now_sql,
        ),
        TemporalMode::AsOf { .. } => format!(
            "{deleted} IS NULL AND {from} <= {ts} AND ({to} IS NULL OR {to} > {ts})",
            deleted = qualified("deleted_at"),
            from = qualified("valid_from"),
            to = qualified("valid_to"),
            ts = now_sql,
        ),
    };
    TemporalFilterFragment {
        alias: alias.to_string(),
        sql,
    }
}

/// Memoizes [`temporal_filter_fragment`] results for the lifetime of one
/// compile call, keyed on alias (each alias has exactly one temporal mode
/// per query, so the alias alone is a sufficient key).
#[derive(Debug, Default)]
pub struct TemporalFilterMemo {
    cache: HashMap<String, TemporalFilterFragment>,
}

impl TemporalFilterMemo {
    pub fn get_or_compute(
        &mut self,
        alias: &str,
        mode: &TemporalMode,
        now_sql: &str,
    ) -> &TemporalFilterFragment {
        self.cache
            .entry(alias.to_string())
            .or_insert_with(|| temporal_filter_fragment(alias, mode, now_sql))
    }
}

/// Result of extracting a vector-similarity predicate from a conjunction.
pub struct VectorExtraction {
    pub vector: Option<VectorSimilarity>,
    pub remaining: Option<PredicateExpression>,
}

/// Walks a predicate tree looking for a `vector_similarity` leaf living at an
/// AND-conjunction position. At most one is permitted; a second occurrence,
/// or one reachable only through an OR/NOT, is a compile error (the OR/NOT
/// case is also caught earlier by [`PredicateExpression::validate`], but this
/// pass re-checks it directly since it runs on fragments that may never have
/// gone through full AST validation, e.g. CLI tooling building plans by hand).
pub fn extract_vector_predicate(predicate: Option<PredicateExpression>) -> CompileResult<VectorExtraction> {
    let Some(predicate) = predicate else {
        return Ok(VectorExtraction {
            vector: None,
            remaining: None,
        });
    };

    let mut found: Option<VectorSimilarity> = None;
    let remaining = strip_vector(predicate, &mut found)?;
    Ok(VectorExtraction {
        vector: found,
        remaining,
    })
}

fn strip_vector(
    expr: PredicateExpression,
    found: &mut Option<VectorSimilarity>,
) -> CompileResult<Option<PredicateExpression>> {
    match expr {
        PredicateExpression::VectorSimilarity(v) => {
            if found.is_some() {
                return Err(CompileError::unsupported(
                    "at most one vector_similarity predicate is supported per query",
                ));
            }
            *found = Some(v);
            Ok(None)
        }
        PredicateExpression::And(children) => {
            let mut kept = Vec::new();
            for child in children {
                if let Some(remaining) = strip_vector(child, found)? {
                    kept.push(remaining);
                }
            }
            Ok(match kept.len() {
                0 => None,
                1 => kept.into_iter().next(),
                _ => Some(PredicateExpression::And(kept)),
            })
        }
        other @ (PredicateExpression::Or(_) | PredicateExpression::Not(_)) => {
            if contains_vector(&other) {
                return Err(CompileError::unsupported(
                    "vector_similarity may not appear under or/not",
                ));
            }
            Ok(Some(other))
        }
        other => Ok(Some(other)),
    }
}

fn contains_vector(expr: &PredicateExpression) -> bool {
    match expr {
        PredicateExpression::VectorSimilarity(_) => true,
        PredicateExpression::And(children) | PredicateExpression::Or(children) => {
            children.iter().any(contains_vector)
        }
        PredicateExpression::Not(inner) => contains_vector(inner),
        _ => false,
    }
}

/// Picks the single `variableLength` traversal in a leaf's traversal list, if
/// any. Multiplicity beyond one is rejected upstream by
/// [`crate::ast::QueryAst::validate`]; this pass only needs to locate it.
pub fn select_recursive_traversal(traversals: &[Traversal]) -> Option<&Traversal> {
    traversals.iter().find(|t| t.variable_length.is_some())
}

/// If a vector KNN is present and the query has no explicit limit, `k`
/// becomes the effective plan limit.
pub fn vector_aware_limit(explicit_limit: Option<u64>, vector: Option<&VectorSimilarity>) -> Option<u64> {
    match (explicit_limit, vector) {
        (Some(limit), _) => Some(limit),
        (None, Some(v)) => Some(v.k as u64),
        (None, None) => None,
    }
}

/// Per-alias set of JSON pointers actually referenced by predicates,
/// projection, or order-by — used to prune CTE `SELECT` lists to only the
/// columns a query needs.
pub fn required_columns(leaf: &QueryLeaf) -> HashMap<String, HashSet<JsonPointer>> {
    let mut required: HashMap<String, HashSet<JsonPointer>> = HashMap::new();

    for predicate in &leaf.predicates {
        collect_predicate_fields(&predicate.expr, &mut required);
    }
    if let Some(having) = &leaf.having {
        collect_predicate_fields(having, &mut required);
    }
    for field in &leaf.group_by {
        note_field(&mut required, field);
    }
    for projection in &leaf.projection {
        if let Some(pointer) = &projection.pointer {
            required
                .entry(projection.alias.clone())
                .or_default()
                .insert(pointer.clone());
        }
    }
    for order in &leaf.order_by {
        if let Some(pointer) = &order.pointer {
            required
                .entry(order.alias.clone())
                .or_default()
                .insert(pointer.clone());
        }
    }

    required
}

fn note_field(required: &mut HashMap<String, HashSet<JsonPointer>>, field: &FieldRef) {
    required
        .entry(field.alias.clone())
        .or_default()
        .insert(field.pointer.clone());
}

fn collect_predicate_fields(expr: &PredicateExpression, required: &mut HashMap<String, HashSet<JsonPointer>>) {
    match expr {
        PredicateExpression::Comparison { field, .. }
        | PredicateExpression::StringOp { field, .. }
        | PredicateExpression::NullCheck { field, .. }
        | PredicateExpression::Between { field, .. }
        | PredicateExpression::ArrayOp { field, .. }
        | PredicateExpression::ObjectOp { field, .. } => note_field(required, field),
        PredicateExpression::AggregateComparison(agg) => {
            if let Some(field) = &agg.field {
                note_field(required, field);
            }
        }
        PredicateExpression::VectorSimilarity(v) => note_field(required, &v.field),
        PredicateExpression::InSubquery { inner, .. } => note_field(required, &inner.field),
        PredicateExpression::Exists { .. } => {}
        PredicateExpression::And(children) | PredicateExpression::Or(children) => {
            for child in children {
                collect_predicate_fields(child, required);
            }
        }
        PredicateExpression::Not(child) => collect_predicate_fields(child, required),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ComparisonOp, PredicateValue, ScalarValue, StartSpec, ValueType, VectorMetric};

    fn field(alias: &str, ptr: &str) -> FieldRef {
        FieldRef::new(alias, JsonPointer::parse(ptr).unwrap(), ValueType::String)
    }

    fn vector(alias: &str) -> PredicateExpression {
        PredicateExpression::VectorSimilarity(VectorSimilarity {
            field: field(alias, "/embedding"),
            metric: VectorMetric::Cosine,
            query_embedding: vec![0.1, 0.2],
            k: 3,
        })
    }

    fn eq(alias: &str, ptr: &str) -> PredicateExpression {
        PredicateExpression::Comparison {
            field: field(alias, ptr),
            op: ComparisonOp::Eq,
            value: PredicateValue::Scalar(ScalarValue::String("x".into())),
        }
    }

    #[test]
    fn current_mode_guards_deleted_and_validity_window() {
        let fragment = temporal_filter_fragment("p", &TemporalMode::Current, "CURRENT_TIMESTAMP");
        assert!(fragment.sql.contains("deleted_at IS NULL"));
        assert!(fragment.sql.contains("valid_from"));
        assert!(fragment.sql.contains("valid_to"));
    }

    #[test]
    fn include_ended_drops_valid_to_guard() {
        let fragment = temporal_filter_fragment("p", &TemporalMode::IncludeEnded, "CURRENT_TIMESTAMP");
        assert!(!fragment.sql.contains("valid_to"));
    }

    #[test]
    fn include_tombstones_drops_deleted_guard() {
        let fragment = temporal_filter_fragment("p", &TemporalMode::IncludeTombstones, "CURRENT_TIMESTAMP");
        assert!(!fragment.sql.contains("deleted_at"));
    }

    #[test]
    fn memo_reuses_fragment_for_same_alias() {
        let mut memo = TemporalFilterMemo::default();
        let first = memo
            .get_or_compute("p", &TemporalMode::Current, "CURRENT_TIMESTAMP")
            .clone();
        let second = memo.get_or_compute("p", &TemporalMode::Current, "CURRENT_TIMESTAMP");
        assert_eq!(first, *second);
    }

    #[test]
    fn single_vector_predicate_is_extracted() {
        let expr = PredicateExpression::And(vec![eq("p", "/name"), vector("p")]);
        let extraction = extract_vector_predicate(Some(expr)).unwrap();
        assert!(extraction.vector.is_some());
        assert!(extraction.remaining.is_some());
    }

    #[test]
    fn second_vector_predicate_is_rejected() {
        let expr = PredicateExpression::And(vec![vector("p"), vector("p")]);
        assert!(extract_vector_predicate(Some(expr)).is_err());
    }

    #[test]
    fn vector_under_or_is_rejected() {
        let expr = PredicateExpression::Or(vec![eq("p", "/name"), vector("p")]);
        assert!(extract_vector_predicate(Some(expr)).is_err());
    }

    #[test]
    fn no_vector_predicate_leaves_remaining_untouched() {
        let expr = eq("p", "/name");
        let extraction = extract_vector_predicate(Some(expr.clone())).unwrap();
        assert!(extraction.vector.is_none());
        assert_eq!(extraction.remaining, Some(expr));
    }

    #[test]
    fn vector_aware_limit_uses_k_when_no_explicit_limit() {
        let v = VectorSimilarity {
            field: field("p", "/embedding"),
            metric: VectorMetric::Cosine,
            query_embedding: vec![0.1],
            k: 7,
        };
        assert_eq!(vector_aware_limit(None, Some(&v)), Some(7));
        assert_eq!(vector_aware_limit(Some(20), Some(&v)), Some(20));
        assert_eq!(vector_aware_limit(None, None), None);
    }

    #[test]
    fn required_columns_collects_predicate_and_projection_fields() {
        let mut leaf = QueryLeaf::new(
            "g1".into(),
            StartSpec {
                alias: "p".into(),
                kinds: vec!["Person".into()],
                include_sub_classes: false,
            },
        );
        leaf.predicates.push(crate::ast::Predicate {
            target_alias: "p".into(),
            target_type: crate::ast::TargetType::Node,
            expr: eq("p", "/name"),
        });
        leaf.projection.push(crate::ast::ProjectionField {
            alias: "p".into(),
            pointer: Some(JsonPointer::parse("/age").unwrap()),
            output_name: "age".into(),
            aggregate: None,
        });

        let required = required_columns(&leaf);
        let p_fields = &required["p"];
        assert!(p_fields.contains(&JsonPointer::parse("/name").unwrap()));
        assert!(p_fields.contains(&JsonPointer::parse("/age").unwrap()));
    }
}
