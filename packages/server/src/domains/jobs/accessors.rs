//! Typed accessors for heterogeneous upstream JSON (spec §9 "Dynamic
//! record shape").
//!
//! Upstream returns inconsistent casing and optional fields per endpoint;
//! rather than normalizing the shape once (it differs endpoint-by-endpoint
//! and normalizing now would just move the inconsistency into a
//! translation table that rots), each job reaches for these small typed
//! getters at the point of use.

use serde_json::Value;

pub fn get_str<'a>(raw: &'a Value, key: &str, default: &'a str) -> &'a str {
    raw.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

pub fn get_str_opt<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(|v| v.as_str())
}

pub fn get_i64(raw: &Value, key: &str, default: i64) -> i64 {
    raw.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

pub fn get_f64(raw: &Value, key: &str, default: f64) -> f64 {
    raw.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

pub fn get_bool(raw: &Value, key: &str, default: bool) -> bool {
    raw.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Walks a dotted path (`"address.city"`) into nested objects.
pub fn get_nested<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(raw, |cur, part| cur.get(part))
}
