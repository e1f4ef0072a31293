//! Comparison operators and value semantics.
//!
//! Absence (`None`) compares equal to `null`, is falsy, and never orders
//! against anything.

use crate::error::{FeedError, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A single condition applied to the value found at a field path.
#[derive(Clone, Debug, PartialEq)]
pub enum Operator {
    /// Literal value: strict type-and-value equality.
    Eq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

impl Operator {
    /// Parse one `$op: operand` pair of an operator object.
    pub fn parse(name: &str, operand: &Value) -> Result<Self> {
        let op = match name {
            "$gt" => Operator::Gt(operand.clone()),
            "$gte" => Operator::Gte(operand.clone()),
            "$lt" => Operator::Lt(operand.clone()),
            "$lte" => Operator::Lte(operand.clone()),
            "$ne" => Operator::Ne(operand.clone()),
            "$in" => Operator::In(list_operand(name, operand)?),
            "$nin" => Operator::Nin(list_operand(name, operand)?),
            "$exists" => match operand {
                Value::Bool(b) => Operator::Exists(*b),
                other => Operator::Exists(is_truthy(Some(other))),
            },
            other => return Err(FeedError::UnsupportedOperator(other.to_string())),
        };
        Ok(op)
    }

    /// Parse the condition(s) for one field path. An object whose keys all
    /// start with `$` is an operator object; anything else is a literal.
    pub fn parse_condition(path: &str, condition: &Value) -> Result<Vec<Self>> {
        let Value::Object(fields) = condition else {
            return Ok(vec![Operator::Eq(condition.clone())]);
        };

        let operator_keys = fields.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Ok(vec![Operator::Eq(condition.clone())]);
        }
        if operator_keys != fields.len() {
            return Err(FeedError::InvalidQuery(format!(
                "'{}' mixes operators and plain fields",
                path
            )));
        }

        operator_object(fields)
    }

    /// Evaluate against the value found at a path (`None` when absent).
    pub fn evaluate(&self, actual: Option<&Value>) -> bool {
        match self {
            Operator::Eq(expected) => values_equal(actual, expected),
            Operator::Ne(expected) => !values_equal(actual, expected),
            Operator::Gt(expected) => compare(actual, expected) == Some(Ordering::Greater),
            Operator::Gte(expected) => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt(expected) => compare(actual, expected) == Some(Ordering::Less),
            Operator::Lte(expected) => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::In(list) => list.iter().any(|v| values_equal(actual, v)),
            Operator::Nin(list) => !list.iter().any(|v| values_equal(actual, v)),
            Operator::Exists(expected) => is_truthy(actual) == *expected,
        }
    }
}

fn operator_object(fields: &Map<String, Value>) -> Result<Vec<Operator>> {
    fields
        .iter()
        .map(|(name, operand)| Operator::parse(name, operand))
        .collect()
}

fn list_operand(name: &str, operand: &Value) -> Result<Vec<Value>> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(FeedError::InvalidQuery(format!("{} expects an array", name))),
    }
}

/// Strict equality. Numbers compare by value (`5 == 5.0`), never across types
/// (`5 != "5"`). An absent value equals `null`.
pub fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => {
            if a.is_f64() || b.is_f64() {
                a.as_f64() == b.as_f64()
            } else {
                a == b
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(Some(x), y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map_or(false, |w| values_equal(Some(v), w)))
        }
        (a, b) => a == b,
    }
}

/// Ordering between two values of the same kind: numbers with numbers and
/// strings with strings. Everything else, including absence, is unordered.
pub fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                return Some(x.cmp(&y));
            }
            if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
                return Some(x.cmp(&y));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Truthiness used by `$exists`: absent, `null`, `false`, `0` and `""` are falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_is_type_strict() {
        assert!(values_equal(Some(&json!(5)), &json!(5)));
        assert!(values_equal(Some(&json!(5)), &json!(5.0)));
        assert!(!values_equal(Some(&json!("5")), &json!(5)));
        assert!(!values_equal(Some(&json!(true)), &json!(1)));
        assert!(values_equal(None, &Value::Null));
        assert!(values_equal(Some(&json!({"a": [1, 2]})), &json!({"a": [1, 2.0]})));
    }

    #[test]
    fn test_compare_requires_matching_kinds() {
        assert_eq!(compare(Some(&json!(41)), &json!(40)), Some(Ordering::Greater));
        assert_eq!(compare(Some(&json!(40.5)), &json!(40)), Some(Ordering::Greater));
        assert_eq!(compare(Some(&json!("b")), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(Some(&json!("41")), &json!(40)), None);
        assert_eq!(compare(None, &json!(40)), None);
        assert_eq!(compare(Some(&Value::Null), &json!(40)), None);
    }

    #[test]
    fn test_absent_never_orders() {
        assert!(!Operator::Lt(json!(40)).evaluate(None));
        assert!(!Operator::Gt(json!(40)).evaluate(None));
    }

    #[test]
    fn test_ne_absent_is_true() {
        assert!(Operator::Ne(json!("yes")).evaluate(None));
        assert!(!Operator::Ne(json!("yes")).evaluate(Some(&json!("yes"))));
        assert!(!Operator::Ne(Value::Null).evaluate(None));
    }

    #[test]
    fn test_in_and_nin() {
        let list = vec![json!("dog"), json!("puppy")];
        assert!(Operator::In(list.clone()).evaluate(Some(&json!("dog"))));
        assert!(!Operator::In(list.clone()).evaluate(Some(&json!("cat"))));
        assert!(!Operator::In(list.clone()).evaluate(None));
        assert!(Operator::Nin(list.clone()).evaluate(None));
        assert!(!Operator::Nin(list).evaluate(Some(&json!("puppy"))));
        assert!(Operator::In(vec![Value::Null]).evaluate(None));
    }

    #[test]
    fn test_exists_uses_truthiness() {
        assert!(Operator::Exists(true).evaluate(Some(&json!(40))));
        assert!(!Operator::Exists(true).evaluate(None));
        assert!(Operator::Exists(false).evaluate(None));
        assert!(Operator::Exists(false).evaluate(Some(&json!(0))));
        assert!(Operator::Exists(false).evaluate(Some(&json!(""))));
        assert!(!Operator::Exists(false).evaluate(Some(&json!([]))));
    }

    #[test]
    fn test_parse_condition() {
        assert_eq!(
            Operator::parse_condition("w", &json!(5)).unwrap(),
            vec![Operator::Eq(json!(5))]
        );
        assert_eq!(
            Operator::parse_condition("w", &json!({"a": 1})).unwrap(),
            vec![Operator::Eq(json!({"a": 1}))]
        );
        assert_eq!(
            Operator::parse_condition("w", &json!({"$gt": 40, "$lt": 45})).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Operator::parse_condition("w", &json!({"$elemMatch": {"a": 1}})),
            Err(FeedError::UnsupportedOperator(_))
        ));
        assert!(matches!(
            Operator::parse_condition("w", &json!({"$regex": "a.*"})),
            Err(FeedError::UnsupportedOperator(_))
        ));
        assert!(matches!(
            Operator::parse_condition("w", &json!({"$in": "dog"})),
            Err(FeedError::InvalidQuery(_))
        ));
        assert!(matches!(
            Operator::parse_condition("w", &json!({"$gt": 1, "plain": 2})),
            Err(FeedError::InvalidQuery(_))
        ));
    }
}
