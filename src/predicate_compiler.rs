//! Translates a [`PredicateExpression`] into a SQL boolean fragment (spec §4.I).

use crate::ast::{
    ArrayOp, ComparisonOp, FieldRef, NullCheckOp, ObjectOp, PredicateExpression, PredicateValue,
    ScalarValue, StringOp, ValueType,
};
use crate::dialect::DialectAdapter;
use crate::error::{CompileError, CompileResult};

/// Selects how a [`FieldRef`] is addressed in the emitted fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CteColumnPrefix {
    /// Post-CTE, qualified: `cte_<alias>.<alias>_<col>`.
    PostCte,
    /// Bare column — used inside a CTE's own definition.
    Bare,
    /// A table alias such as `"n"`/`"e"` — used inside traversal joins.
    TableAlias(String),
}

pub struct PredicateCompilerContext<'a> {
    pub dialect: &'a dyn DialectAdapter,
    pub cte_column_prefix: Option<CteColumnPrefix>,
}

impl<'a> PredicateCompilerContext<'a> {
    pub fn new(dialect: &'a dyn DialectAdapter) -> Self {
        Self {
            dialect,
            cte_column_prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: CteColumnPrefix) -> Self {
        self.cte_column_prefix = Some(prefix);
        self
    }

    fn column_for(&self, field: &FieldRef) -> String {
        match &self.cte_column_prefix {
            None | Some(CteColumnPrefix::PostCte) => format!("cte_{alias}.props", alias = field.alias),
            Some(CteColumnPrefix::Bare) => "props".to_string(),
            Some(CteColumnPrefix::TableAlias(prefix)) => format!("{prefix}.props"),
        }
    }

    fn extract(&self, field: &FieldRef) -> String {
        let column = self.column_for(field);
        let pointer = field.pointer.encode();
        match field.value_type {
            ValueType::Number => self.dialect.json_extract_number(&column, &pointer),
            ValueType::Boolean => self.dialect.json_extract_boolean(&column, &pointer),
            // Dates are extracted as text and compared lexicographically
            // against an ISO-8601 literal, matching the stored format.
            ValueType::String | ValueType::Date => self.dialect.json_extract_text(&column, &pointer),
            // Array/object fall back to text extraction; comparisons against
            // them are rejected earlier by `compile`.
            ValueType::Array | ValueType::Object => self.dialect.json_extract_text(&column, &pointer),
        }
    }
}

fn comparison_operator(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "=",
        ComparisonOp::Neq => "!=",
        ComparisonOp::Gt => ">",
        ComparisonOp::Gte => ">=",
        ComparisonOp::Lt => "<",
        ComparisonOp::Lte => "<=",
        ComparisonOp::In | ComparisonOp::NotIn => unreachable!("handled separately"),
    }
}

fn escape_like(pattern: &str) -> String {
    pattern.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn render_scalar(value: &ScalarValue) -> String {
    match value {
        ScalarValue::String(s) => quote_literal(s),
        ScalarValue::Number(n) => n.to_string(),
        ScalarValue::Boolean(b) => if *b { "1".to_string() } else { "0".to_string() },
        ScalarValue::Date(d) => quote_literal(&d.to_rfc3339()),
    }
}

/// Compiles a [`PredicateExpression`] into a SQL fragment, or a constant-folded
/// `1=0`/`1=1` for the documented empty-collection special cases.
pub fn compile(expr: &PredicateExpression, ctx: &PredicateCompilerContext<'_>) -> CompileResult<String> {
    match expr {
        PredicateExpression::Comparison { field, op, value } => {
            compile_comparison(field, *op, value, ctx)
        }
        PredicateExpression::StringOp { field, op, pattern } => {
            compile_string_op(field, *op, pattern, ctx)
        }
        PredicateExpression::NullCheck { field, op } => {
            let extracted = ctx.extract(field);
            Ok(match op {
                NullCheckOp::IsNull => format!("{extracted} IS NULL"),
                NullCheckOp::IsNotNull => format!("{extracted} IS NOT NULL"),
            })
        }
        PredicateExpression::Between { field, low, high } => {
            reject_non_scalar_comparison(field)?;
            let (PredicateValue::Scalar(low), PredicateValue::Scalar(high)) = (low, high) else {
                return Err(CompileError::validation("between bounds must be scalar"));
            };
            let extracted = ctx.extract(field);
            Ok(format!(
                "{extracted} BETWEEN {} AND {}",
                render_scalar(low),
                render_scalar(high)
            ))
        }
        PredicateExpression::ArrayOp { field, op } => compile_array_op(field, op, ctx),
        PredicateExpression::ObjectOp { field, op } => compile_object_op(field, op, ctx),
        PredicateExpression::AggregateComparison(agg) => {
            let op = comparison_operator(agg.op);
            let func = aggregate_sql(agg.func, agg.field.as_ref(), ctx);
            let PredicateValue::Scalar(value) = &agg.value else {
                return Err(CompileError::validation(
                    "aggregate comparison value must be scalar",
                ));
            };
            Ok(format!("{func} {op} {}", render_scalar(value)))
        }
        PredicateExpression::Exists { .. } => Err(CompileError::unsupported(
            "exists subqueries are compiled by the caller, which has the nested compiled SQL",
        )),
        PredicateExpression::InSubquery { .. } => Err(CompileError::unsupported(
            "in_subquery is compiled by the caller, which has the nested compiled SQL",
        )),
        PredicateExpression::VectorSimilarity(_) => Err(CompileError::invariant(
            "predicate_compiler",
            "vector_similarity must be lifted out before reaching the predicate compiler",
        )),
        PredicateExpression::And(children) => compile_connective(children, "AND", ctx),
        PredicateExpression::Or(children) => compile_connective(children, "OR", ctx),
        PredicateExpression::Not(child) => Ok(format!("NOT ({})", compile(child, ctx)?)),
    }
}

fn compile_connective(children: &[PredicateExpression], joiner: &str, ctx: &PredicateCompilerContext<'_>) -> CompileResult<String> {
    if children.is_empty() {
        return Ok(if joiner == "AND" { "1=1".to_string() } else { "1=0".to_string() });
    }
    let parts: Vec<String> = children
        .iter()
        .map(|c| compile(c, ctx).map(|s| format!("({s})")))
        .collect::<CompileResult<_>>()?;
    Ok(parts.join(&format!(" {joiner} ")))
}

fn reject_non_scalar_comparison(field: &FieldRef) -> CompileResult<()> {
    if matches!(field.value_type, ValueType::Array | ValueType::Object) {
        return Err(CompileError::unsupported(
            "comparisons against JSON arrays/objects are rejected",
        ));
    }
    Ok(())
}

fn compile_comparison(
    field: &FieldRef,
    op: ComparisonOp,
    value: &PredicateValue,
    ctx: &PredicateCompilerContext<'_>,
) -> CompileResult<String> {
    reject_non_scalar_comparison(field)?;
    let extracted = ctx.extract(field);

    match (op, value) {
        (ComparisonOp::In, PredicateValue::List(values)) => {
            if values.is_empty() {
                return Ok("1=0".to_string());
            }
            let rendered: Vec<String> = values.iter().map(render_scalar).collect();
            Ok(format!("{extracted} IN ({})", rendered.join(", ")))
        }
        (ComparisonOp::NotIn, PredicateValue::List(values)) => {
            if values.is_empty() {
                return Ok("1=1".to_string());
            }
            let rendered: Vec<String> = values.iter().map(render_scalar).collect();
            Ok(format!("{extracted} NOT IN ({})", rendered.join(", ")))
        }
        (ComparisonOp::In | ComparisonOp::NotIn, PredicateValue::Scalar(_)) => Err(
            CompileError::validation("in/notIn requires a list value"),
        ),
        (_, PredicateValue::Scalar(scalar)) => {
            Ok(format!("{extracted} {} {}", comparison_operator(op), render_scalar(scalar)))
        }
        (_, PredicateValue::List(_)) => Err(CompileError::validation(
            "comparison operator other than in/notIn requires a scalar value",
        )),
    }
}

fn compile_string_op(
    field: &FieldRef,
    op: StringOp,
    pattern: &str,
    ctx: &PredicateCompilerContext<'_>,
) -> CompileResult<String> {
    let extracted = ctx.extract(field);
    let escaped = escape_like(pattern);
    let like_pattern = match op {
        StringOp::Contains => format!("%{escaped}%"),
        StringOp::StartsWith => format!("{escaped}%"),
        StringOp::EndsWith => format!("%{escaped}"),
        StringOp::Like => escaped.clone(),
        StringOp::Ilike => escaped.clone(),
    };
    let literal = quote_literal(&like_pattern);
    Ok(match op {
        StringOp::Ilike => ctx.dialect.case_insensitive_like(&extracted, &literal),
        _ => format!("{extracted} LIKE {literal} ESCAPE '\\'"),
    })
}

fn compile_array_op(field: &FieldRef, op: &ArrayOp, ctx: &PredicateCompilerContext<'_>) -> CompileResult<String> {
    let column = ctx.column_for(field);
    let pointer = field.pointer.encode();
    let length = ctx.dialect.json_array_length(&column, &pointer);
    Ok(match op {
        ArrayOp::IsEmpty => format!("{length} = 0"),
        ArrayOp::IsNotEmpty => format!("{length} > 0"),
        ArrayOp::LengthEq { value } => format!("{length} = {value}"),
        ArrayOp::LengthGt { value } => format!("{length} > {value}"),
        ArrayOp::LengthGte { value } => format!("{length} >= {value}"),
        ArrayOp::LengthLt { value } => format!("{length} < {value}"),
        ArrayOp::LengthLte { value } => format!("{length} <= {value}"),
        ArrayOp::Contains { value } => match value {
            PredicateValue::Scalar(scalar) => {
                let each = ctx.dialect.json_each(&column, &pointer);
                format!(
                    "EXISTS (SELECT 1 FROM {each} AS elem WHERE elem.value = {})",
                    render_scalar(scalar)
                )
            }
            PredicateValue::List(values) if values.is_empty() => "1=0".to_string(),
            PredicateValue::List(_) => {
                return Err(CompileError::validation("contains expects a single value, not a list"))
            }
        },
        ArrayOp::ContainsAll { values } => {
            if values.is_empty() {
                return Ok("1=1".to_string());
            }
            let each = ctx.dialect.json_each(&column, &pointer);
            let clauses: Vec<String> = values
                .iter()
                .map(|value| {
                    let PredicateValue::Scalar(scalar) = value else {
                        return Err(CompileError::validation("containsAll expects scalar values"));
                    };
                    Ok(format!(
                        "EXISTS (SELECT 1 FROM {each} AS elem WHERE elem.value = {})",
                        render_scalar(scalar)
                    ))
                })
                .collect::<CompileResult<_>>()?;
            clauses.join(" AND ")
        }
        ArrayOp::ContainsAny { values } => {
            if values.is_empty() {
                return Ok("1=0".to_string());
            }
            let each = ctx.dialect.json_each(&column, &pointer);
            let rendered: Vec<String> = values
                .iter()
                .map(|value| {
                    let PredicateValue::Scalar(scalar) = value else {
                        return Err(CompileError::validation("containsAny expects scalar values"));
                    };
                    Ok(render_scalar(scalar))
                })
                .collect::<CompileResult<_>>()?;
            format!(
                "EXISTS (SELECT 1 FROM {each} AS elem WHERE elem.value IN ({}))",
                rendered.join(", ")
            )
        }
    })
}

fn compile_object_op(field: &FieldRef, op: &ObjectOp, ctx: &PredicateCompilerContext<'_>) -> CompileResult<String> {
    let column = ctx.column_for(field);
    Ok(match op {
        ObjectOp::HasKey { key } => {
            let pointer = field.pointer.join(&crate::pointer::JsonPointer::from_segments(vec![
                crate::pointer::Segment::Property(key.clone()),
            ])?)?;
            format!("{} IS NOT NULL", ctx.dialect.json_extract_text(&column, &pointer.encode()))
        }
        ObjectOp::HasPath { pointer } => {
            let joined = field.pointer.join(pointer)?;
            format!("{} IS NOT NULL", ctx.dialect.json_extract_text(&column, &joined.encode()))
        }
        ObjectOp::PathEquals { pointer, value } => {
            let joined = field.pointer.join(pointer)?;
            let PredicateValue::Scalar(scalar) = value else {
                return Err(CompileError::validation("pathEquals expects a scalar value"));
            };
            format!(
                "{} = {}",
                ctx.dialect.json_extract_text(&column, &joined.encode()),
                render_scalar(scalar)
            )
        }
        ObjectOp::PathContains { pointer, value } => {
            let joined = field.pointer.join(pointer)?;
            let each = ctx.dialect.json_each(&column, &joined.encode());
            let PredicateValue::Scalar(scalar) = value else {
                return Err(CompileError::validation("pathContains expects a scalar value"));
            };
            format!(
                "EXISTS (SELECT 1 FROM {each} AS elem WHERE elem.value = {})",
                render_scalar(scalar)
            )
        }
        ObjectOp::PathIsNull { pointer } => {
            let joined = field.pointer.join(pointer)?;
            format!("{} IS NULL", ctx.dialect.json_extract_text(&column, &joined.encode()))
        }
        ObjectOp::PathIsNotNull { pointer } => {
            let joined = field.pointer.join(pointer)?;
            format!("{} IS NOT NULL", ctx.dialect.json_extract_text(&column, &joined.encode()))
        }
    })
}

pub(crate) fn aggregate_sql(func: crate::ast::AggregateFn, field: Option<&FieldRef>, ctx: &PredicateCompilerContext<'_>) -> String {
    use crate::ast::AggregateFn;
    let arg = field.map(|f| ctx.extract(f)).unwrap_or_else(|| "*".to_string());
    match func {
        AggregateFn::Count => format!("COUNT({arg})"),
        AggregateFn::CountDistinct => format!("COUNT(DISTINCT {arg})"),
        AggregateFn::Sum => format!("SUM({arg})"),
        AggregateFn::Avg => format!("AVG({arg})"),
        AggregateFn::Min => format!("MIN({arg})"),
        AggregateFn::Max => format!("MAX({arg})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FieldRef;
    use crate::dialect::SqliteDialect;
    use crate::pointer::JsonPointer;

    fn field(value_type: ValueType) -> FieldRef {
        FieldRef::new("p", JsonPointer::parse("/name").unwrap(), value_type)
    }

    #[test]
    fn empty_in_list_folds_to_false() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::Comparison {
            field: field(ValueType::String),
            op: ComparisonOp::In,
            value: PredicateValue::List(vec![]),
        };
        assert_eq!(compile(&expr, &ctx).unwrap(), "1=0");
    }

    #[test]
    fn empty_not_in_list_folds_to_true() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::Comparison {
            field: field(ValueType::String),
            op: ComparisonOp::NotIn,
            value: PredicateValue::List(vec![]),
        };
        assert_eq!(compile(&expr, &ctx).unwrap(), "1=1");
    }

    #[test]
    fn empty_contains_all_folds_to_true() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::ArrayOp {
            field: field(ValueType::Array),
            op: ArrayOp::ContainsAll { values: vec![] },
        };
        assert_eq!(compile(&expr, &ctx).unwrap(), "1=1");
    }

    #[test]
    fn empty_contains_any_folds_to_false() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::ArrayOp {
            field: field(ValueType::Array),
            op: ArrayOp::ContainsAny { values: vec![] },
        };
        assert_eq!(compile(&expr, &ctx).unwrap(), "1=0");
    }

    #[test]
    fn like_pattern_escapes_percent_and_underscore() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::StringOp {
            field: field(ValueType::String),
            op: StringOp::Contains,
            pattern: "100%_off".to_string(),
        };
        let sql = compile(&expr, &ctx).unwrap();
        assert!(sql.contains("100\\%\\_off"));
    }

    #[test]
    fn comparisons_against_array_fields_are_rejected() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::Comparison {
            field: field(ValueType::Array),
            op: ComparisonOp::Eq,
            value: PredicateValue::Scalar(ScalarValue::String("x".into())),
        };
        assert!(compile(&expr, &ctx).is_err());
    }

    #[test]
    fn ilike_on_sqlite_lowers_both_sides() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::StringOp {
            field: field(ValueType::String),
            op: StringOp::Ilike,
            pattern: "ada".to_string(),
        };
        let sql = compile(&expr, &ctx).unwrap();
        assert!(sql.contains("LOWER("));
    }

    #[test]
    fn vector_similarity_reaching_compiler_is_an_invariant_violation() {
        let dialect = SqliteDialect;
        let ctx = PredicateCompilerContext::new(&dialect);
        let expr = PredicateExpression::VectorSimilarity(crate::ast::VectorSimilarity {
            field: field(ValueType::Array),
            metric: crate::ast::VectorMetric::Cosine,
            query_embedding: vec![0.1],
            k: 1,
        });
        let err = compile(&expr, &ctx).unwrap_err();
        assert!(matches!(err, CompileError::CompilerInvariant { .. }));
    }
}
