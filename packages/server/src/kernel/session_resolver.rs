//! Session Resolver (spec §4.7).
//!
//! Maps a symbolic selector (`"all"`, `"1"`–`"4"`, embedded variants like
//! `"2a"`, aliases like `"toc"`) onto a year-scoped list of upstream
//! session ids by looking them up in the record store. For a main session,
//! child sessions (whose `parent_upstream_id` points at the main) are
//! gathered too, so downstream job filters cover the full cohort. `"all"`
//! resolves to an empty list, meaning "no filter".

use serde_json::json;

use crate::kernel::errors::CoreError;
use crate::kernel::record_store::{Filter, RecordStore};

const SESSIONS_COLLECTION: &str = "sessions";
const LOOKUP_PAGE_SIZE: u32 = 200;

/// Symbolic aliases that don't match a session's stored `code` verbatim.
/// `"toc"` ("take-over-camp", the closing session) is the only alias named
/// in the spec; this table is where a real deployment's ~30-job alias list
/// would grow.
const ALIASES: &[(&str, &str)] = &[("toc", "2a")];

fn canonical_code(selector: &str) -> String {
    let lower = selector.to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, code)| code.to_string())
        .unwrap_or(lower)
}

pub struct SessionResolver<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> SessionResolver<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Resolves `selector` for `year` into upstream session ids. `"all"`
    /// (case-insensitive) yields an empty vec, meaning no filter.
    pub async fn resolve(&self, selector: &str, year: i32) -> Result<Vec<String>, CoreError> {
        if selector.eq_ignore_ascii_case("all") {
            return Ok(Vec::new());
        }

        let code = canonical_code(selector);
        let filter = Filter::year(year).and(Filter::Eq("code".to_string(), json!(code)));
        let matches = self.store.find(SESSIONS_COLLECTION, &filter, LOOKUP_PAGE_SIZE, 0).await?;

        let mut ids = Vec::new();
        for record in &matches {
            let Some(upstream_id) = record.field("upstream_id").as_str().map(String::from) else {
                continue;
            };
            ids.push(upstream_id.clone());

            if record.field("is_main").as_bool() == Some(true) {
                let child_filter = Filter::year(year)
                    .and(Filter::Eq("parent_upstream_id".to_string(), json!(upstream_id)));
                let children = self
                    .store
                    .find(SESSIONS_COLLECTION, &child_filter, LOOKUP_PAGE_SIZE, 0)
                    .await?;
                ids.extend(
                    children
                        .iter()
                        .filter_map(|c| c.field("upstream_id").as_str().map(String::from)),
                );
            }
        }

        Ok(ids)
    }
}
