//! Sessions job: a lookup-only collection job that also backs the Session
//! Resolver (spec §4.7, SUPPLEMENTED FEATURES).
//!
//! Maps the upstream sessions endpoint into the `sessions` collection
//! shape the Session Resolver queries directly: `code`, `is_main`,
//! `parent_upstream_id`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domains::jobs::accessors::{get_bool, get_str, get_str_opt};
use crate::kernel::composite_key::CompositeKey;
use crate::kernel::errors::CoreError;
use crate::kernel::record_store::Filter;
use crate::kernel::upsert::SyncJob;
use crate::kernel::upstream_client::UpstreamClient;

const SESSIONS_PATH: &str = "/sessions";
const PAGE_SIZE: u32 = 100;

pub struct SessionsJob;

impl SessionsJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SessionsJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncJob for SessionsJob {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn collection(&self) -> &'static str {
        "sessions"
    }

    async fn fetch(&self, client: &UpstreamClient, year: Option<i32>) -> Result<Vec<Value>, CoreError> {
        let year = year.unwrap_or_else(|| client.year());
        let client = client.clone_with_year(year);
        client
            .fetch_all(SESSIONS_PATH, PAGE_SIZE, &[])
            .await
            .map_err(CoreError::from)
    }

    fn map(&self, raw: &Value, year: Option<i32>) -> Result<(CompositeKey, Value), CoreError> {
        let upstream_id = get_str_opt(raw, "Id")
            .or_else(|| get_str_opt(raw, "id"))
            .ok_or_else(|| CoreError::TransformInvalid("session missing id".into()))?;

        let key = CompositeKey::single(upstream_id.to_string(), year);
        let fields = json!({
            "_key": key.as_str(),
            "upstream_id": upstream_id,
            "code": get_str(raw, "Code", get_str(raw, "code", "")),
            "is_main": get_bool(raw, "IsMain", get_bool(raw, "isMain", false)),
            "parent_upstream_id": get_str_opt(raw, "ParentId").or_else(|| get_str_opt(raw, "parentId")),
            "year": year,
        });

        Ok((key, fields))
    }

    fn scope_filter(&self, year: Option<i32>) -> Filter {
        match year {
            Some(y) => Filter::year(y),
            None => Filter::All,
        }
    }
}
