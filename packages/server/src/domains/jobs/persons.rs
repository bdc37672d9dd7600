//! Persons job: a second, simpler job demonstrating the Base Sync
//! Pattern with a flatter mapping than `attendees` (no relation
//! resolution — see SUPPLEMENTED FEATURES).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domains::jobs::accessors::{get_nested, get_str, get_str_opt};
use crate::kernel::composite_key::CompositeKey;
use crate::kernel::errors::CoreError;
use crate::kernel::record_store::Filter;
use crate::kernel::upsert::SyncJob;
use crate::kernel::upstream_client::UpstreamClient;

const PERSONS_PATH: &str = "/persons";
const PAGE_SIZE: u32 = 100;

pub struct PersonsJob;

impl PersonsJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PersonsJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncJob for PersonsJob {
    fn name(&self) -> &'static str {
        "persons"
    }

    fn collection(&self) -> &'static str {
        "persons"
    }

    async fn fetch(&self, client: &UpstreamClient, year: Option<i32>) -> Result<Vec<Value>, CoreError> {
        let year = year.unwrap_or_else(|| client.year());
        let client = client.clone_with_year(year);
        client
            .fetch_all(PERSONS_PATH, PAGE_SIZE, &[])
            .await
            .map_err(CoreError::from)
    }

    fn map(&self, raw: &Value, year: Option<i32>) -> Result<(CompositeKey, Value), CoreError> {
        let upstream_id = get_str_opt(raw, "PersonId")
            .or_else(|| get_str_opt(raw, "personId"))
            .ok_or_else(|| CoreError::TransformInvalid("person missing id".into()))?;

        let city = get_nested(raw, "Address.City")
            .or_else(|| get_nested(raw, "address.city"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let key = CompositeKey::single(upstream_id.to_string(), year);
        let fields = json!({
            "_key": key.as_str(),
            "upstream_id": upstream_id,
            "first_name": get_str(raw, "FirstName", get_str(raw, "firstName", "")),
            "last_name": get_str(raw, "LastName", get_str(raw, "lastName", "")),
            "email": get_str(raw, "Email", get_str(raw, "email", "")),
            "city": city,
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
