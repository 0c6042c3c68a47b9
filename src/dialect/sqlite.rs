//! SQLite dialect adapter. Assumes the `json1` extension (bundled in modern
//! SQLite builds) and, for vector predicates, the `sqlite-vec` extension's
//! `vec_distance_*` functions.

use crate::ast::VectorMetric;

use super::{format_embedding, json_path_to_sqlite, DialectAdapter, DialectName, SetOperationStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl DialectAdapter for SqliteDialect {
    fn name(&self) -> DialectName {
        DialectName::Sqlite
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn json_extract_text(&self, column: &str, pointer: &str) -> String {
        format!("({column} ->> '{}')", json_path_to_sqlite(pointer))
    }

    fn json_extract_number(&self, column: &str, pointer: &str) -> String {
        format!("CAST({column} ->> '{}' AS REAL)", json_path_to_sqlite(pointer))
    }

    fn json_extract_boolean(&self, column: &str, pointer: &str) -> String {
        format!("CAST({column} ->> '{}' AS INTEGER)", json_path_to_sqlite(pointer))
    }

    fn json_array_length(&self, column: &str, pointer: &str) -> String {
        format!("json_array_length({column}, '{}')", json_path_to_sqlite(pointer))
    }

    fn json_each(&self, column: &str, pointer: &str) -> String {
        format!("json_each({column}, '{}')", json_path_to_sqlite(pointer))
    }

    fn json_type(&self, column: &str, pointer: &str) -> String {
        format!("json_type({column}, '{}')", json_path_to_sqlite(pointer))
    }

    fn vector_distance(&self, column: &str, query_embedding: &[f32], metric: VectorMetric) -> String {
        let func = match metric {
            VectorMetric::Cosine => "vec_distance_cosine",
            VectorMetric::L2 => "vec_distance_L2",
            VectorMetric::InnerProduct => "vec_distance_inner_product",
        };
        format!("{func}({column}, '{}')", format_embedding(query_embedding))
    }

    fn current_timestamp(&self) -> String {
        "CURRENT_TIMESTAMP".to_string()
    }

    fn set_operation_strategy(&self) -> SetOperationStrategy {
        SetOperationStrategy::SqliteCompound
    }

    fn case_insensitive_like(&self, column_expr: &str, pattern_literal: &str) -> String {
        format!("LOWER({column_expr}) LIKE LOWER({pattern_literal})")
    }

    fn cycle_guard(&self, path_column: &str, candidate_id_expr: &str) -> String {
        format!("INSTR({path_column}, {candidate_id_expr}) = 0")
    }

    fn path_append(&self, path_column: &str, id_expr: &str) -> String {
        format!("{path_column} || ',' || {id_expr}")
    }

    fn path_seed(&self, id_expr: &str) -> String {
        format!("CAST({id_expr} AS TEXT)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_guard_uses_instr_on_string_path() {
        let sql = SqliteDialect.cycle_guard("path", "n.id");
        assert_eq!(sql, "INSTR(path, n.id) = 0");
    }

    #[test]
    fn path_seed_casts_to_text() {
        assert_eq!(SqliteDialect.path_seed("n.id"), "CAST(n.id AS TEXT)");
    }
}
