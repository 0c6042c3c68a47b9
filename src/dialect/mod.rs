//! Dialect adapter: the capability boundary between the compiler and a
//! specific SQL backend. Modeled as a trait object rather than the const
//! capability-table modules the rest of this workspace's SQL-analysis half
//! uses, since dialect selection here is a runtime choice (the caller picks
//! SQLite or PostgreSQL per connection), not a compile-time code-generation
//! target.

mod postgres;
mod sqlite;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ast::VectorMetric;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DialectName {
    Sqlite,
    Postgres,
}

/// How a dialect can compose multiple `SELECT`s into a `UNION`/`INTERSECT`/`EXCEPT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperationStrategy {
    /// Each leaf is parenthesized and joined by the operator keyword; the
    /// suffix clause (ORDER BY/LIMIT/OFFSET) applies to the whole compound.
    StandardParenthesized,
    /// SQLite forbids parenthesized SELECTs inside a compound statement —
    /// leaf CTEs are lifted into one outer WITH and referenced unparenthesized.
    SqliteCompound,
}

/// Capability/SQL-fragment boundary a dialect must provide. Every method is
/// a pure string-builder over already-validated identifiers; escaping of
/// untrusted values (not identifiers) is the predicate compiler's job.
pub trait DialectAdapter: Send + Sync {
    fn name(&self) -> DialectName;

    fn quote_identifier(&self, name: &str) -> String;

    /// Extracts a JSON Pointer-addressed value as text.
    fn json_extract_text(&self, column: &str, pointer: &str) -> String;
    fn json_extract_number(&self, column: &str, pointer: &str) -> String;
    fn json_extract_boolean(&self, column: &str, pointer: &str) -> String;
    fn json_array_length(&self, column: &str, pointer: &str) -> String;
    /// Expands a JSON array at `pointer` into a row set, e.g. for `containsAny`.
    fn json_each(&self, column: &str, pointer: &str) -> String;
    fn json_type(&self, column: &str, pointer: &str) -> String;

    fn vector_distance(&self, column: &str, query_embedding: &[f32], metric: VectorMetric) -> String;

    /// SQL text for "now"; used by the temporal filter pass and as the
    /// recursive-CTE step's default depth-less upper bound reference point.
    fn current_timestamp(&self) -> String;

    fn set_operation_strategy(&self) -> SetOperationStrategy;

    /// Case-insensitive LIKE: SQLite has no native ILIKE, so both sides must
    /// be lowered; PostgreSQL's native ILIKE needs no rewriting.
    fn case_insensitive_like(&self, column_expr: &str, pattern_literal: &str) -> String;

    /// Cycle-guard fragment for a recursive CTE step, given the path column
    /// name and the candidate id expression.
    fn cycle_guard(&self, path_column: &str, candidate_id_expr: &str) -> String;

    /// How a recursive CTE accumulates the path column across depths.
    fn path_append(&self, path_column: &str, id_expr: &str) -> String;

    fn path_seed(&self, id_expr: &str) -> String;
}

fn format_embedding(query_embedding: &[f32]) -> String {
    let parts: Vec<String> = query_embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Renders an RFC 6901 wire-form pointer (`"/a/0/b"`) as a SQLite `json1`
/// path (`"$.a[0].b"`). `pointer == ""` addresses the whole column, for
/// which SQLite's `json1` functions accept `'$'`.
fn json_path_to_sqlite(pointer: &str) -> String {
    let parsed = crate::pointer::JsonPointer::parse(pointer)
        .expect("pointer was already validated when the AST was built");
    let mut path = String::from("$");
    for segment in parsed.segments() {
        match segment {
            crate::pointer::Segment::Property(p) => {
                path.push('.');
                path.push_str(p);
            }
            crate::pointer::Segment::Index(i) => {
                path.push('[');
                path.push_str(&i.to_string());
                path.push(']');
            }
        }
    }
    path
}

/// Renders an RFC 6901 wire-form pointer as a Postgres `jsonb` path array
/// literal (`"{a,0,b}"`), as consumed by the `#>`/`#>>` operators.
fn json_path_to_postgres(pointer: &str) -> String {
    let parsed = crate::pointer::JsonPointer::parse(pointer)
        .expect("pointer was already validated when the AST was built");
    let parts: Vec<String> = parsed
        .segments()
        .iter()
        .map(|segment| match segment {
            crate::pointer::Segment::Property(p) => p.clone(),
            crate::pointer::Segment::Index(i) => i.to_string(),
        })
        .collect();
    format!("{{{}}}", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_and_postgres_disagree_on_set_operation_strategy() {
        let sqlite = SqliteDialect;
        let postgres = PostgresDialect;
        assert_eq!(
            sqlite.set_operation_strategy(),
            SetOperationStrategy::SqliteCompound
        );
        assert_eq!(
            postgres.set_operation_strategy(),
            SetOperationStrategy::StandardParenthesized
        );
    }

    #[test]
    fn sqlite_ilike_lowers_both_sides() {
        let sqlite = SqliteDialect;
        let sql = sqlite.case_insensitive_like("n.name", "'%ada%'");
        assert!(sql.contains("LOWER("));
        assert_eq!(sql.matches("LOWER(").count(), 2);
    }

    #[test]
    fn postgres_ilike_uses_native_operator() {
        let postgres = PostgresDialect;
        let sql = postgres.case_insensitive_like("n.name", "'%ada%'");
        assert!(sql.contains("ILIKE"));
        assert!(!sql.contains("LOWER("));
    }
}
