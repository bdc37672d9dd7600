//! Normalized field equality (spec §4.4.1).
//!
//! The record store and the transform layer produce different concrete
//! types for the same logical value (a number round-tripping as float on
//! read and int on write, an absent field on one side and an empty string
//! on the other). Deep structural equality of the native representation is
//! therefore unsafe to rely on — this module is the documented fix for the
//! "field-equality false positives" Open Question in spec §9.

use serde_json::Value;

/// A normalized comparison of two `serde_json::Value`s representing the
/// same logical field, per spec §4.4.1:
///   - numeric-with-numeric across int/float representations (equal if the
///     values coincide when cast to the wider type)
///   - empty-string/zero/absent treated as interchangeable on both sides
///   - boolean-with-boolean
///   - collection-of-id membership (ignoring order) for multi-select
///     relation fields
pub fn fields_equal(a: &Value, b: &Value) -> bool {
    if is_blank(a) && is_blank(b) {
        return true;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => id_sets_equal(x, y),
        // A scalar on one side and its blank-equivalent representation on
        // the other already matched above; anything else differing in
        // shape is a real difference.
        _ => a == b,
    }
}

/// Treats JSON `null`, an empty string, a zero number, and an empty array
/// as the same "blank" value regardless of which side produced it.
fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn numbers_equal(x: &serde_json::Number, y: &serde_json::Number) -> bool {
    if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
        return xi == yi;
    }
    if let (Some(xu), Some(yu)) = (x.as_u64(), y.as_u64()) {
        return xu == yu;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(xf), Some(yf)) => (xf - yf).abs() < f64::EPSILON,
        _ => false,
    }
}

/// Order-free membership comparison for multi-select relation fields:
/// two arrays are equal if they contain the same set of scalar ids,
/// regardless of order or duplication.
fn id_sets_equal(x: &[Value], y: &[Value]) -> bool {
    let xs: std::collections::HashSet<String> = x.iter().map(scalar_key).collect();
    let ys: std::collections::HashSet<String> = y.iter().map(scalar_key).collect();
    xs == ys
}

/// Canonicalizes a scalar (or nested object/array, as a fallback) into a
/// string key so ids of differing JSON number/string representation still
/// compare equal (e.g. `1` and `"1"`).
fn scalar_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_and_float_representations_of_same_value_are_equal() {
        assert!(fields_equal(&json!(5), &json!(5.0)));
    }

    #[test]
    fn differing_numbers_are_not_equal() {
        assert!(!fields_equal(&json!(5), &json!(6)));
    }

    #[test]
    fn blank_equivalents_are_interchangeable() {
        assert!(fields_equal(&json!(null), &json!("")));
        assert!(fields_equal(&json!(""), &json!(0)));
        assert!(fields_equal(&json!(0), &json!(null)));
        assert!(fields_equal(&json!([]), &json!(null)));
    }

    #[test]
    fn booleans_compare_by_value() {
        assert!(fields_equal(&json!(true), &json!(true)));
        assert!(!fields_equal(&json!(true), &json!(false)));
    }

    #[test]
    fn id_arrays_compare_as_order_free_sets() {
        assert!(fields_equal(&json!([1, 2, 3]), &json!([3, 1, 2])));
        assert!(fields_equal(&json!(["a", "b"]), &json!(["b", "a"])));
        assert!(!fields_equal(&json!([1, 2]), &json!([1, 2, 3])));
    }

    #[test]
    fn id_arrays_ignore_string_vs_number_representation() {
        assert!(fields_equal(&json!([1, 2]), &json!(["1", "2"])));
    }

    #[test]
    fn strings_compare_exactly_when_non_blank() {
        assert!(fields_equal(&json!("alpha"), &json!("alpha")));
        assert!(!fields_equal(&json!("alpha"), &json!("beta")));
    }
}
