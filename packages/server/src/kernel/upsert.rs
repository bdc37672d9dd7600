//! The Base Sync Pattern (spec §4.4): every job drives the same
//! preload → fetch → compare-and-write → orphan-deletion skeleton. Only the
//! per-job mapping and upstream fetch are pluggable (`SyncJob`); the
//! traversal, composite-key bookkeeping, and orphan-safety rule live here
//! once.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::kernel::composite_key::CompositeKey;
use crate::kernel::errors::CoreError;
use crate::kernel::record_store::{Filter, Record, RecordStore};
use crate::kernel::stats::Stats;
use crate::kernel::upstream_client::UpstreamClient;

const PRELOAD_PAGE_SIZE: u32 = 500;

/// The pluggable half of a sync job: how to fetch this job's upstream
/// records and how to map one raw record into a composite key plus the
/// normalized field set that gets written to the store. The traversal
/// itself — preload, per-record compare, orphan deletion — is generic
/// (`run_sync`).
#[async_trait]
pub trait SyncJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// The record store collection this job owns.
    fn collection(&self) -> &'static str;

    /// Fetches every upstream record in scope for `year` (`None` for
    /// jobs that are not year-scoped).
    async fn fetch(&self, client: &UpstreamClient, year: Option<i32>) -> Result<Vec<Value>, CoreError>;

    /// Maps one raw upstream record to its composite key and the
    /// normalized field set to persist. Returning `Err` skips the record
    /// as `TransformInvalid` without aborting the job.
    fn map(&self, raw: &Value, year: Option<i32>) -> Result<(CompositeKey, Value), CoreError>;

    /// The filter scoping which existing store rows belong to this job's
    /// run, for both preload and orphan-deletion comparison.
    fn scope_filter(&self, year: Option<i32>) -> Filter;
}

/// Runs the Base Sync Pattern for `job` against `year`, returning the
/// resulting counters.
///
/// Orphan deletion only happens when the upstream fetch completed in full
/// (no error escaped `job.fetch`); a job that errors mid-fetch leaves
/// existing records untouched rather than risk deleting records upstream
/// still has (spec §4.4, "orphan deletion only on verified full-fetch
/// success").
pub async fn run_sync(
    job: &dyn SyncJob,
    store: &dyn RecordStore,
    client: &UpstreamClient,
    year: Option<i32>,
    cancel: &CancellationToken,
) -> Result<Stats, CoreError> {
    let mut stats = Stats::new();
    let collection = job.collection();
    let scope = job.scope_filter(year);

    let existing = preload_existing(store, collection, &scope).await?;

    let raw_records = job.fetch(client, year).await?;

    let mut seen: HashSet<CompositeKey> = HashSet::with_capacity(raw_records.len());

    for raw in &raw_records {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let (key, fields) = match job.map(raw, year) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(job = job.name(), error = %e, "skipping unmappable record");
                stats.errors += 1;
                continue;
            }
        };

        seen.insert(key.clone());

        match existing.get(&key) {
            None => {
                if let Err(e) = store.upsert(collection, &Record::new(fields)).await {
                    tracing::warn!(job = job.name(), error = %e, "create failed");
                    stats.errors += 1;
                } else {
                    stats.created += 1;
                }
            }
            Some(current) => {
                if record_differs(&current.fields, &fields) {
                    let to_save = Record {
                        id: current.id.clone(),
                        fields,
                    };
                    if let Err(e) = store.upsert(collection, &to_save).await {
                        tracing::warn!(job = job.name(), error = %e, "update failed");
                        stats.errors += 1;
                    } else {
                        stats.updated += 1;
                    }
                } else {
                    stats.skipped += 1;
                }
            }
        }
    }

    for (key, record) in &existing {
        if !seen.contains(key) {
            if let Some(id) = &record.id {
                if let Err(e) = store.delete(collection, id).await {
                    tracing::warn!(job = job.name(), error = %e, "orphan delete failed");
                    stats.errors += 1;
                } else {
                    stats.deleted += 1;
                }
            }
        }
    }

    if let Err(e) = store.checkpoint().await {
        tracing::warn!(job = job.name(), error = %e, "checkpoint failed");
    }

    Ok(stats)
}

async fn preload_existing(
    store: &dyn RecordStore,
    collection: &str,
    scope: &Filter,
) -> Result<HashMap<CompositeKey, Record>, CoreError> {
    let mut out = HashMap::new();
    let mut offset = 0;
    loop {
        let page = store.find(collection, scope, PRELOAD_PAGE_SIZE, offset).await?;
        let page_len = page.len() as u32;
        for record in page {
            if let Some(key) = record.fields.get("_key").and_then(|v| v.as_str()) {
                out.insert(CompositeKey::single(key.to_string(), None), record);
            }
        }
        if page_len < PRELOAD_PAGE_SIZE {
            break;
        }
        offset += page_len;
    }
    Ok(out)
}

/// True when any top-level field differs under normalized equality.
fn record_differs(existing: &Value, incoming: &Value) -> bool {
    let (Value::Object(existing), Value::Object(incoming)) = (existing, incoming) else {
        return existing != incoming;
    };

    for (field, new_value) in incoming {
        let old_value = existing.get(field).cloned().unwrap_or(Value::Null);
        if !crate::kernel::field_eq::fields_equal(&old_value, new_value) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::record_store::InMemoryRecordStore;
    use serde_json::json;

    struct FixedJob {
        records: Vec<Value>,
    }

    #[async_trait]
    impl SyncJob for FixedJob {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn collection(&self) -> &'static str {
            "widgets"
        }

        async fn fetch(&self, _client: &UpstreamClient, _year: Option<i32>) -> Result<Vec<Value>, CoreError> {
            Ok(self.records.clone())
        }

        fn map(&self, raw: &Value, _year: Option<i32>) -> Result<(CompositeKey, Value), CoreError> {
            let id = raw
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CoreError::TransformInvalid("missing id".into()))?;
            Ok((
                CompositeKey::single(id.to_string(), None),
                json!({"_key": id, "name": raw.get("name").cloned().unwrap_or(Value::Null)}),
            ))
        }

        fn scope_filter(&self, _year: Option<i32>) -> Filter {
            Filter::All
        }
    }

    fn client() -> UpstreamClient {
        UpstreamClient::new("k".into(), "s".into(), "c".into(), 2024)
    }

    #[tokio::test]
    async fn first_run_creates_every_record() {
        let store = InMemoryRecordStore::new();
        let job = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha"}), json!({"id": "b", "name": "Beta"})],
        };

        let stats = run_sync(&job, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.created, 2);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.deleted, 0);
    }

    #[tokio::test]
    async fn second_run_with_identical_data_is_fully_idempotent() {
        let store = InMemoryRecordStore::new();
        let job = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha"})],
        };

        run_sync(&job, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();
        let stats = run_sync(&job, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.created, 0);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn changed_field_triggers_update_not_recreate() {
        let store = InMemoryRecordStore::new();
        let first = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha"})],
        };
        run_sync(&first, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        let second = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha Prime"})],
        };
        let stats = run_sync(&second, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.created, 0);
        assert_eq!(stats.updated, 1);

        let rows = store.find("widgets", &Filter::All, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("name"), json!("Alpha Prime"));
    }

    #[tokio::test]
    async fn record_missing_from_second_fetch_is_deleted_as_orphan() {
        let store = InMemoryRecordStore::new();
        let first = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha"}), json!({"id": "b", "name": "Beta"})],
        };
        run_sync(&first, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        let second = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha"})],
        };
        let stats = run_sync(&second, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.deleted, 1);
        let rows = store.find("widgets", &Filter::All, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unmappable_record_is_skipped_as_transform_error_without_aborting() {
        let store = InMemoryRecordStore::new();
        let job = FixedJob {
            records: vec![json!({"name": "no id"}), json!({"id": "a", "name": "Alpha"})],
        };

        let stats = run_sync(&job, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.created, 1);
    }

    /// Spec §8 property 6: shuffling the upstream page order must not
    /// change the final record set or any counter (the processed-key set
    /// is order-independent by construction).
    #[tokio::test]
    async fn reordering_upstream_records_does_not_change_the_outcome() {
        let in_order = FixedJob {
            records: vec![
                json!({"id": "a", "name": "Alpha"}),
                json!({"id": "b", "name": "Beta"}),
                json!({"id": "c", "name": "Gamma"}),
            ],
        };
        let store_in_order = InMemoryRecordStore::new();
        let stats_in_order = run_sync(&in_order, &store_in_order, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        let shuffled = FixedJob {
            records: vec![
                json!({"id": "c", "name": "Gamma"}),
                json!({"id": "a", "name": "Alpha"}),
                json!({"id": "b", "name": "Beta"}),
            ],
        };
        let store_shuffled = InMemoryRecordStore::new();
        let stats_shuffled = run_sync(&shuffled, &store_shuffled, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats_in_order.created, stats_shuffled.created);
        assert_eq!(stats_in_order.updated, stats_shuffled.updated);
        assert_eq!(stats_in_order.skipped, stats_shuffled.skipped);
        assert_eq!(stats_in_order.deleted, stats_shuffled.deleted);

        let mut rows_in_order = store_in_order.find("widgets", &Filter::All, 10, 0).await.unwrap();
        let mut rows_shuffled = store_shuffled.find("widgets", &Filter::All, 10, 0).await.unwrap();
        rows_in_order.sort_by(|a, b| a.field("name").as_str().cmp(&b.field("name").as_str()));
        rows_shuffled.sort_by(|a, b| a.field("name").as_str().cmp(&b.field("name").as_str()));
        assert_eq!(
            rows_in_order.iter().map(|r| r.field("name")).collect::<Vec<_>>(),
            rows_shuffled.iter().map(|r| r.field("name")).collect::<Vec<_>>()
        );
    }

    struct FailingFetchJob;

    #[async_trait]
    impl SyncJob for FailingFetchJob {
        fn name(&self) -> &'static str {
            "failing_fetch"
        }

        fn collection(&self) -> &'static str {
            "widgets"
        }

        async fn fetch(&self, _client: &UpstreamClient, _year: Option<i32>) -> Result<Vec<Value>, CoreError> {
            Err(CoreError::UpstreamFetch("mid-pagination failure".into()))
        }

        fn map(&self, raw: &Value, _year: Option<i32>) -> Result<(CompositeKey, Value), CoreError> {
            let id = raw.get("id").and_then(|v| v.as_str()).unwrap();
            Ok((CompositeKey::single(id.to_string(), None), json!({"_key": id})))
        }

        fn scope_filter(&self, _year: Option<i32>) -> Filter {
            Filter::All
        }
    }

    /// Spec §8 property 4: if the upstream fetch errors before returning,
    /// the job fails entirely and existing records are left untouched —
    /// orphan deletion never runs on an incomplete fetch, regardless of
    /// whether those records would otherwise have gone unseen.
    #[tokio::test]
    async fn fetch_failure_aborts_the_job_without_deleting_existing_records() {
        let store = InMemoryRecordStore::new();
        let seed = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha"}), json!({"id": "b", "name": "Beta"})],
        };
        run_sync(&seed, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        let result = run_sync(&FailingFetchJob, &store, &client(), None, &CancellationToken::new()).await;

        assert!(matches!(result, Err(CoreError::UpstreamFetch(_))));
        let rows = store.find("widgets", &Filter::All, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_the_job_without_orphan_deletion() {
        let store = InMemoryRecordStore::new();
        let first = FixedJob {
            records: vec![json!({"id": "a", "name": "Alpha"})],
        };
        run_sync(&first, &store, &client(), None, &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let second = FixedJob {
            records: vec![json!({"id": "b", "name": "Beta"})],
        };
        let result = run_sync(&second, &store, &client(), None, &cancel).await;

        assert!(matches!(result, Err(CoreError::Cancelled)));
        let rows = store.find("widgets", &Filter::All, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("name"), json!("Alpha"));
    }
}
