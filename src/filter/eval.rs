use std::cmp::Ordering;

use serde_json::Value;

use super::compile::{ElemMatch, FieldOp, JsonType, Matcher};
use super::errors::FilterResult;

impl Matcher {
    /// Test one document. Errors raised by custom operators abort the test.
    pub fn test(&self, doc: &Value) -> FilterResult<bool> {
        match self {
            Matcher::All(clauses) => {
                for clause in clauses {
                    if !clause.test(doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Matcher::Any(clauses) => {
                for clause in clauses {
                    if clause.test(doc)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Matcher::Nor(clauses) => {
                for clause in clauses {
                    if clause.test(doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Matcher::Not(inner) => Ok(!inner.test(doc)?),
            Matcher::Field(path, ops) => {
                let value = path.resolve(doc);
                all_hold(ops, value.as_ref(), doc)
            }
        }
    }
}

fn all_hold(ops: &[FieldOp], value: Option<&Value>, doc: &Value) -> FilterResult<bool> {
    for op in ops {
        if !op_holds(op, value, doc)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn op_holds(op: &FieldOp, value: Option<&Value>, doc: &Value) -> FilterResult<bool> {
    let holds = match op {
        FieldOp::Eq(expected) => equals(value, expected),
        FieldOp::Ne(expected) => !equals(value, expected),
        FieldOp::Gt(bound) => any_ordered(value, bound, |o| o == Ordering::Greater),
        FieldOp::Gte(bound) => any_ordered(value, bound, |o| o != Ordering::Less),
        FieldOp::Lt(bound) => any_ordered(value, bound, |o| o == Ordering::Less),
        FieldOp::Lte(bound) => any_ordered(value, bound, |o| o != Ordering::Greater),
        FieldOp::In(choices) => choices.iter().any(|c| equals(value, c)),
        FieldOp::Nin(choices) => !choices.iter().any(|c| equals(value, c)),
        FieldOp::Exists(flag) => value.is_some() == *flag,
        FieldOp::Type(ty) => value.is_some_and(|v| {
            JsonType::of(v) == *ty
                || matches!(v, Value::Array(items) if items.iter().any(|i| JsonType::of(i) == *ty))
        }),
        FieldOp::Regex(re) => match value {
            Some(Value::String(s)) => re.is_match(s),
            Some(Value::Array(items)) => items
                .iter()
                .any(|i| matches!(i, Value::String(s) if re.is_match(s))),
            _ => false,
        },
        FieldOp::Size(size) => matches!(value, Some(Value::Array(items)) if items.len() == *size),
        FieldOp::All(required) => match value {
            Some(Value::Array(items)) => required
                .iter()
                .all(|r| items.iter().any(|i| values_equal(i, r))),
            _ => false,
        },
        FieldOp::ElemMatch(elem) => {
            let Some(Value::Array(items)) = value else {
                return Ok(false);
            };
            for item in items {
                let hit = match elem {
                    ElemMatch::Document(matcher) => matcher.test(item)?,
                    ElemMatch::Value(ops) => all_hold(ops, Some(item), item)?,
                };
                if hit {
                    return Ok(true);
                }
            }
            false
        }
        FieldOp::Not(ops) => !all_hold(ops, value, doc)?,
        FieldOp::Custom(predicate) => predicate.test(doc)?,
    };

    Ok(holds)
}

/// Equality with array and missing-field semantics: `null` matches a
/// missing field, and an array matches when it equals the expected value
/// or any element does.
fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(actual) => {
            values_equal(actual, expected)
                || matches!(actual, Value::Array(items) if items.iter().any(|i| values_equal(i, expected)))
        }
    }
}

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Order two scalars of the same kind; mixed kinds do not order.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn any_ordered(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Value| compare(v, bound).is_some_and(&accept);
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(check),
        Some(v) => check(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_equal_by_value() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_compare_mixed_kinds() {
        assert_eq!(compare(&json!(2), &json!(10)), Some(Ordering::Less));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!("2"), &json!(10)), None);
    }

    #[test]
    fn test_equals_with_arrays_and_missing() {
        assert!(equals(Some(&json!(["a", "b"])), &json!("b")));
        assert!(equals(Some(&json!(["a", "b"])), &json!(["a", "b"])));
        assert!(equals(None, &Value::Null));
        assert!(!equals(None, &json!("a")));
    }
}
