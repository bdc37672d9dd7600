//! Canonical composite-key builder (spec §3 "CompositeKey", §4.4.2).
//!
//! The same builder is used to track processed records and to index
//! preloaded existing records, so the two maps are directly comparable.

use std::fmt::Display;

/// A canonical string identity for a record, built from upstream ids and
/// optionally the year. Conventions:
///   - `"a:b"`      identity pair
///   - `"a:b|year"` year-scoped identity pair
///   - `"a|year"`   single-id year-scoped
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(String);

impl CompositeKey {
    /// Build a key from one or more upstream identifiers, optionally
    /// year-scoped. Pick the smallest set of identifiers that is unique
    /// within the job's scope (spec §4.4.2).
    pub fn build(ids: &[&dyn Display], year: Option<i32>) -> Self {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(":");
        let key = match year {
            Some(y) => format!("{joined}|{y}"),
            None => joined,
        };
        Self(key)
    }

    pub fn single(id: impl Display, year: Option<i32>) -> Self {
        Self::build(&[&id as &dyn Display], year)
    }

    pub fn pair(a: impl Display, b: impl Display, year: Option<i32>) -> Self {
        Self::build(&[&a as &dyn Display, &b as &dyn Display], year)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CompositeKey> for String {
    fn from(key: CompositeKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_id_no_year() {
        let k = CompositeKey::single("abc123", None);
        assert_eq!(k.as_str(), "abc123");
    }

    #[test]
    fn single_id_year_scoped() {
        let k = CompositeKey::single("abc123", Some(2024));
        assert_eq!(k.as_str(), "abc123|2024");
    }

    #[test]
    fn identity_pair_no_year() {
        let k = CompositeKey::pair("session-1", "person-9", None);
        assert_eq!(k.as_str(), "session-1:person-9");
    }

    #[test]
    fn identity_pair_year_scoped() {
        let k = CompositeKey::pair("session-1", "person-9", Some(2023));
        assert_eq!(k.as_str(), "session-1:person-9|2023");
    }

    #[test]
    fn equal_inputs_produce_equal_keys() {
        let a = CompositeKey::pair("x", "y", Some(2024));
        let b = CompositeKey::pair("x", "y", Some(2024));
        assert_eq!(a, b);
    }
}
