//! Attendees job: the canonical job, exercising the relation-resolution
//! pass for cyclic/many-to-many relations (spec §9): an attendee record
//! references a person and a session by the *upstream* id upstream uses,
//! but downstream consumers need the stable composite-key reference this
//! repo's own `persons`/`sessions` collections are indexed by. Rather than
//! building an in-memory pointer graph (which deadlocks on save order the
//! way a naive port would), this job preloads a full `upstream_id →
//! composite key` index for both collections once per run, then resolves
//! each attendee against that index in a single pass.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domains::jobs::accessors::{get_f64, get_str_opt};
use crate::kernel::composite_key::CompositeKey;
use crate::kernel::errors::CoreError;
use crate::kernel::record_store::{Filter, RecordStore};
use crate::kernel::upsert::SyncJob;
use crate::kernel::upstream_client::UpstreamClient;

const ATTENDEES_PATH: &str = "/attendees";
const PAGE_SIZE: u32 = 200;
const INDEX_PAGE_SIZE: u32 = 500;

pub struct AttendeesJob {
    store: Arc<dyn RecordStore>,
}

impl AttendeesJob {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Builds an `upstream_id → composite key` index over a full
    /// collection for one year — the "preloaded id-map" the relation-
    /// resolution pass looks records up against.
    async fn load_key_index(&self, collection: &str, year: i32) -> Result<HashMap<String, String>, CoreError> {
        let mut index = HashMap::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .find(collection, &Filter::year(year), INDEX_PAGE_SIZE, offset)
                .await?;
            let page_len = page.len() as u32;
            for record in &page {
                if let (Some(upstream_id), Some(key)) = (
                    record.field("upstream_id").as_str().map(String::from),
                    record.field("_key").as_str().map(String::from),
                ) {
                    index.insert(upstream_id, key);
                }
            }
            if page_len < INDEX_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }
        Ok(index)
    }
}

#[async_trait]
impl SyncJob for AttendeesJob {
    fn name(&self) -> &'static str {
        "attendees"
    }

    fn collection(&self) -> &'static str {
        "attendees"
    }

    async fn fetch(&self, client: &UpstreamClient, year: Option<i32>) -> Result<Vec<Value>, CoreError> {
        let year = year.unwrap_or_else(|| client.year());
        let scoped_client = client.clone_with_year(year);
        let raw_attendees = scoped_client
            .fetch_all(ATTENDEES_PATH, PAGE_SIZE, &[])
            .await
            .map_err(CoreError::from)?;

        let person_index = self.load_key_index("persons", year).await?;
        let session_index = self.load_key_index("sessions", year).await?;

        Ok(raw_attendees
            .into_iter()
            .map(|mut raw| {
                let person_upstream = get_str_opt(&raw, "PersonId")
                    .or_else(|| get_str_opt(&raw, "personId"))
                    .map(str::to_string);
                let session_upstream = get_str_opt(&raw, "SessionId")
                    .or_else(|| get_str_opt(&raw, "sessionId"))
                    .map(str::to_string);

                if let Some(obj) = raw.as_object_mut() {
                    if let Some(key) = person_upstream.as_deref().and_then(|id| person_index.get(id)) {
                        obj.insert("_person_ref".to_string(), json!(key));
                    }
                    if let Some(key) = session_upstream.as_deref().and_then(|id| session_index.get(id)) {
                        obj.insert("_session_ref".to_string(), json!(key));
                    }
                }
                raw
            })
            .collect())
    }

    fn map(&self, raw: &Value, year: Option<i32>) -> Result<(CompositeKey, Value), CoreError> {
        let person_ref = raw
            .get("_person_ref")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::TransformInvalid("attendee's person did not resolve".into()))?;
        let session_ref = raw
            .get("_session_ref")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::TransformInvalid("attendee's session did not resolve".into()))?;

        let key = CompositeKey::pair(person_ref, session_ref, year);
        let fields = json!({
            "_key": key.as_str(),
            "person_ref": person_ref,
            "session_ref": session_ref,
            "bunk": raw.get("Bunk").or_else(|| raw.get("bunk")).cloned().unwrap_or(Value::Null),
            "balance_due": get_f64(raw, "BalanceDue", get_f64(raw, "balanceDue", 0.0)),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::record_store::{InMemoryRecordStore, Record};

    #[tokio::test]
    async fn fetch_resolves_person_and_session_refs_from_preloaded_index() {
        let store = Arc::new(InMemoryRecordStore::new());
        store
            .upsert("persons", &Record::new(json!({"_key": "p-1|2024", "upstream_id": "UP-1", "year": 2024})))
            .await
            .unwrap();
        store
            .upsert("sessions", &Record::new(json!({"_key": "s-1|2024", "upstream_id": "US-1", "year": 2024})))
            .await
            .unwrap();

        let job = AttendeesJob::new(store);
        let index = job.load_key_index("persons", 2024).await.unwrap();
        assert_eq!(index.get("UP-1"), Some(&"p-1|2024".to_string()));
    }

    #[test]
    fn map_builds_pair_key_from_resolved_refs() {
        let store = Arc::new(InMemoryRecordStore::new());
        let job = AttendeesJob::new(store);
        let raw = json!({"_person_ref": "p-1|2024", "_session_ref": "s-1|2024", "Bunk": "Oak"});

        let (key, fields) = job.map(&raw, Some(2024)).unwrap();
        assert_eq!(key.as_str(), "p-1|2024:s-1|2024|2024");
        assert_eq!(fields["bunk"], json!("Oak"));
    }

    #[test]
    fn map_rejects_attendee_whose_person_did_not_resolve() {
        let store = Arc::new(InMemoryRecordStore::new());
        let job = AttendeesJob::new(store);
        let raw = json!({"_session_ref": "s-1|2024"});
        assert!(job.map(&raw, Some(2024)).is_err());
    }
}
