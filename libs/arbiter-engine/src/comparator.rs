//! Output Comparator
//!
//! **Core Responsibility:**
//! Decide whether the value a submission produced matches the expected value.
//!
//! **Rules, first match wins:**
//! 1. Structural equality. Integers, floats and booleans compare by numeric value.
//! 2. Two numbers are equal when they differ by less than [`TOLERANCE`].
//! 3. Two sequences are equal when they hold the same elements in any order.
//!    Elements that cannot be ordered against each other make the pair unequal.
//! 4. The trimmed `str()` renderings are equal.
//!
//! Pure and infallible: nothing in here can fail a grading run.

use std::cmp::Ordering;

use arbiter_common::render::render_value;
use serde_json::Value;

use crate::sort::try_sort_by;

/// Absolute tolerance for numeric comparison.
pub const TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i128),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn numeric(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(*b as i128)),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Some(Num::Int(i as i128)),
            (None, Some(u)) => Some(Num::Int(u as i128)),
            _ => n.as_f64().map(Num::Float),
        },
        _ => None,
    }
}

fn num_cmp(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// Structural equality with numeric cross-type comparison.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return num_cmp(x, y) == Some(Ordering::Equal);
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| loose_eq(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, p)| y.get(key).is_some_and(|q| loose_eq(p, q)))
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Unorderable;

/// Ordering in the scripting language's sense: numbers with numbers, strings
/// with strings, sequences lexicographically. Everything else is unorderable.
fn loose_cmp(a: &Value, b: &Value) -> Result<Ordering, Unorderable> {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return num_cmp(x, y).ok_or(Unorderable);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (p, q) in x.iter().zip(y) {
                if !loose_eq(p, q) {
                    return loose_cmp(p, q);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(Unorderable),
    }
}

fn sorted_eq(actual: &[Value], expected: &[Value]) -> bool {
    if actual.len() != expected.len() {
        return false;
    }
    let mut actual = actual.to_vec();
    let mut expected = expected.to_vec();
    if try_sort_by(&mut actual, loose_cmp).is_err() || try_sort_by(&mut expected, loose_cmp).is_err() {
        return false;
    }
    actual.iter().zip(&expected).all(|(p, q)| loose_eq(p, q))
}

/// Judge `actual` against `expected`.
pub fn outputs_match(actual: &Value, expected: &Value) -> bool {
    if loose_eq(actual, expected) {
        return true;
    }

    if let (Some(a), Some(b)) = (numeric(actual), numeric(expected)) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => (a.as_f64() - b.as_f64()).abs() < TOLERANCE,
        };
    }

    if let (Value::Array(a), Value::Array(b)) = (actual, expected) {
        return sorted_eq(a, b);
    }

    render_value(actual).trim() == render_value(expected).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_and_cross_type_numbers() {
        assert!(outputs_match(&json!(15), &json!(15)));
        assert!(outputs_match(&json!(15.0), &json!(15)));
        assert!(outputs_match(&json!(true), &json!(1)));
        assert!(!outputs_match(&json!(15), &json!(16)));
    }

    #[test]
    fn float_tolerance() {
        assert!(outputs_match(&json!(0.1 + 0.2), &json!(0.3)));
        assert!(outputs_match(&json!(1.0 + 5e-10), &json!(1)));
        assert!(!outputs_match(&json!(1.0 + 2e-9), &json!(1)));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let a = json!(9_007_199_254_740_993i64);
        let b = json!(9_007_199_254_740_992i64);
        assert!(!outputs_match(&a, &b));
    }

    #[test]
    fn sequences_ignore_order() {
        assert!(outputs_match(&json!([3, 1, 2]), &json!([1, 2, 3])));
        assert!(outputs_match(&json!([[2, 1], [1, 2]]), &json!([[1, 2], [2, 1]])));
        assert!(outputs_match(&json!(["b", "a"]), &json!(["a", "b"])));
        assert!(!outputs_match(&json!([1, 2]), &json!([1, 2, 2])));
    }

    #[test]
    fn unorderable_sequences_are_unequal() {
        assert!(!outputs_match(&json!([1, "a"]), &json!(["a", 1])));
        assert!(!outputs_match(&json!([{"a": 1}, null]), &json!([null, {"a": 1}])));
        // identical sequences still match on the first rule
        assert!(outputs_match(&json!([1, "a"]), &json!([1, "a"])));
    }

    #[test]
    fn falls_back_to_trimmed_rendering() {
        assert!(outputs_match(&json!("15"), &json!(15)));
        assert!(outputs_match(&json!(" hello \n"), &json!("hello")));
        assert!(outputs_match(&json!("True"), &json!(true)));
        assert!(!outputs_match(&json!("Hello"), &json!("hello")));
    }

    #[test]
    fn objects_compare_by_content() {
        assert!(outputs_match(&json!({"a": 1, "b": [1.0]}), &json!({"b": [1], "a": 1})));
        assert!(!outputs_match(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }
}
