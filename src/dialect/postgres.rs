//! PostgreSQL dialect adapter. Assumes `props` columns are `jsonb` and, for
//! vector predicates, the `pgvector` extension's distance operators.

use crate::ast::VectorMetric;

use super::{format_embedding, json_path_to_postgres, DialectAdapter, DialectName, SetOperationStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl DialectAdapter for PostgresDialect {
    fn name(&self) -> DialectName {
        DialectName::Postgres
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn json_extract_text(&self, column: &str, pointer: &str) -> String {
        format!("({column} #>> '{}')", json_path_to_postgres(pointer))
    }

    fn json_extract_number(&self, column: &str, pointer: &str) -> String {
        format!("({column} #>> '{}')::numeric", json_path_to_postgres(pointer))
    }

    fn json_extract_boolean(&self, column: &str, pointer: &str) -> String {
        format!("({column} #>> '{}')::boolean", json_path_to_postgres(pointer))
    }

    fn json_array_length(&self, column: &str, pointer: &str) -> String {
        format!(
            "jsonb_array_length({column} #> '{}')",
            json_path_to_postgres(pointer)
        )
    }

    fn json_each(&self, column: &str, pointer: &str) -> String {
        format!(
            "jsonb_array_elements({column} #> '{}')",
            json_path_to_postgres(pointer)
        )
    }

    fn json_type(&self, column: &str, pointer: &str) -> String {
        format!("jsonb_typeof({column} #> '{}')", json_path_to_postgres(pointer))
    }

    fn vector_distance(&self, column: &str, query_embedding: &[f32], metric: VectorMetric) -> String {
        let op = match metric {
            VectorMetric::Cosine => "<=>",
            VectorMetric::L2 => "<->",
            VectorMetric::InnerProduct => "<#>",
        };
        format!("({column} {op} '{}')", format_embedding(query_embedding))
    }

    fn current_timestamp(&self) -> String {
        "CURRENT_TIMESTAMP".to_string()
    }

    fn set_operation_strategy(&self) -> SetOperationStrategy {
        SetOperationStrategy::StandardParenthesized
    }

    fn case_insensitive_like(&self, column_expr: &str, pattern_literal: &str) -> String {
        format!("{column_expr} ILIKE {pattern_literal}")
    }

    fn cycle_guard(&self, path_column: &str, candidate_id_expr: &str) -> String {
        format!("{candidate_id_expr} != ALL({path_column})")
    }

    fn path_append(&self, path_column: &str, id_expr: &str) -> String {
        format!("{path_column} || ARRAY[{id_expr}]")
    }

    fn path_seed(&self, id_expr: &str) -> String {
        format!("ARRAY[{id_expr}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_guard_uses_all_on_array_path() {
        let sql = PostgresDialect.cycle_guard("path", "n.id");
        assert_eq!(sql, "n.id != ALL(path)");
    }

    #[test]
    fn vector_distance_picks_operator_per_metric() {
        let d = PostgresDialect;
        assert!(d.vector_distance("e", &[0.1, 0.2], VectorMetric::Cosine).contains("<=>"));
        assert!(d.vector_distance("e", &[0.1], VectorMetric::L2).contains("<->"));
        assert!(d
            .vector_distance("e", &[0.1], VectorMetric::InnerProduct)
            .contains("<#>"));
    }
}
