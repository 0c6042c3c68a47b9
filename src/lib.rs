//! Schema-typed property-graph query compiler: a fluent-builder-produced
//! [`ast::QueryAst`] is lowered to a [`plan::LogicalPlanNode`] and emitted as
//! dialect-specific SQL by [`emit::emit`]. The [`ontology`] module builds the
//! kind registry and ontology closures a graph's schema defines; [`schema`]
//! serializes, diffs, and migrates that schema across versions.
//!
//! Compilation is pure: [`compile`] does no I/O and the same AST always
//! produces the same SQL text. Everything below the AST — storage,
//! execution, transactions — is a trait boundary in [`backend`] that a
//! caller implements; this crate never talks to a database.

pub mod ast;
pub mod backend;
pub mod compiler;
pub mod dialect;
pub mod emit;
pub mod error;
pub mod ontology;
pub mod options;
pub mod plan;
pub mod pointer;
pub mod predicate_compiler;
#[cfg(feature = "profiler")]
pub mod profiler;
pub mod schema;

pub use ast::QueryAst;
pub use dialect::{DialectAdapter, DialectName};
pub use error::{CompileError, CompileResult, Issue, Severity};
pub use options::{resolve_dialect, CompileOptions};
pub use plan::LogicalPlanNode;
pub use pointer::JsonPointer;

/// Lowers `ast` to a logical plan and emits it as SQL for `options.dialect`,
/// in one call. `ast.validate()` runs first so structural errors (unknown
/// aliases, malformed set-operation ordering) surface before lowering even
/// starts.
pub fn compile(ast: &QueryAst, options: &CompileOptions) -> CompileResult<String> {
    ast.validate()?;
    let plan = plan::lower(ast)?;
    let dialect = resolve_dialect(options.dialect);
    emit::emit(&plan, dialect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldRef, Predicate, ProjectionField, QueryLeaf, StartSpec, TargetType, ValueType};
    use crate::ast::predicate::{ComparisonOp, PredicateExpression};
    use crate::ast::value::{PredicateValue, ScalarValue};

    fn simple_leaf() -> QueryLeaf {
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
        leaf.projection.push(ProjectionField {
            alias: "p".into(),
            pointer: None,
            output_name: "id".into(),
            aggregate: None,
        });
        leaf
    }

    #[test]
    fn scenario_simple_filter_compile_sqlite() {
        let ast = QueryAst::Leaf(simple_leaf());
        let options = CompileOptions::new(DialectName::Sqlite);
        let sql = compile(&ast, &options).unwrap();
        assert!(sql.starts_with("WITH"));
        assert!(sql.contains("cte_p"));
        assert!(sql.contains("FROM typegraph_nodes"));
    }

    #[test]
    fn compile_is_a_pure_function() {
        let ast = QueryAst::Leaf(simple_leaf());
        let options = CompileOptions::new(DialectName::Postgres);
        let first = compile(&ast, &options).unwrap();
        let second = compile(&ast, &options).unwrap();
        assert_eq!(first, second);
    }
}
