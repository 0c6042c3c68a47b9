//! Literal values and the declared types a [`super::FieldRef`] can carry.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The declared type of a field or literal, used to validate homogeneity of
/// `in`/`notIn` arrays and to pick a dialect's typed JSON extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
}

/// A scalar literal carried by a predicate. Arrays/objects are deliberately
/// absent here — predicates that compare against JSON arrays or objects are
/// rejected by the predicate compiler rather than represented as a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "valueType", rename_all = "camelCase")]
pub enum ScalarValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
}

impl ScalarValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ScalarValue::String(_) => ValueType::String,
            ScalarValue::Number(_) => ValueType::Number,
            ScalarValue::Boolean(_) => ValueType::Boolean,
            ScalarValue::Date(_) => ValueType::Date,
        }
    }
}

/// The right-hand side of a [`super::predicate::PredicateExpression::Comparison`]
/// or [`super::predicate::PredicateExpression::Between`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PredicateValue {
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
}

impl PredicateValue {
    /// `in []`/`notIn []` arrays must be homogeneous in `valueType`; an empty
    /// list is trivially homogeneous (the predicate compiler handles it as a
    /// constant-folded `1=0`/`1=1` before this would ever matter).
    pub fn is_homogeneous(&self) -> bool {
        match self {
            PredicateValue::Scalar(_) => true,
            PredicateValue::List(values) => {
                let mut types = values.iter().map(ScalarValue::value_type);
                match types.next() {
                    None => true,
                    Some(first) => types.all(|t| t == first),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_homogeneous() {
        assert!(PredicateValue::List(Vec::new()).is_homogeneous());
    }

    #[test]
    fn mixed_type_list_is_not_homogeneous() {
        let list = PredicateValue::List(vec![
            ScalarValue::String("a".into()),
            ScalarValue::Number(1.0),
        ]);
        assert!(!list.is_homogeneous());
    }

    #[test]
    fn same_type_list_is_homogeneous() {
        let list = PredicateValue::List(vec![ScalarValue::Number(1.0), ScalarValue::Number(2.0)]);
        assert!(list.is_homogeneous());
    }
}
