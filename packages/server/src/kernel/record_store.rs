//! Record Store Adapter (spec §4.3).
//!
//! The CORE assumes a store with paged filtered reads, upsert, delete, and
//! a forceable WAL checkpoint. Schema management is explicitly a non-goal —
//! this module only defines the narrow trait the CORE consumes and two
//! implementations: a `SqliteRecordStore` for real use (rusqlite, WAL mode,
//! grounded on the pack's `less-db`) and an `InMemoryRecordStore` used by
//! the Base Sync Pattern's unit tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::kernel::errors::CoreError;

/// A stored record: an opaque store-assigned id plus its JSON fields.
/// `id.is_none()` signals "not yet persisted" — the Upsert Engine's create
/// vs. update branch is driven by this (spec §4.3 "Upsert").
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: Option<String>,
    pub fields: Value,
}

impl Record {
    pub fn new(fields: Value) -> Self {
        Self { id: None, fields }
    }

    pub fn field(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }
}

/// A predicate in the simple filter language the CORE uses to scope a
/// paged read (spec §4.3: equality, `&&`, `||`, `~` contains). Expressed as
/// a small AST rather than a string so job code builds filters without
/// string-escaping concerns; a store adapter is free to compile this down
/// to its native query language.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    Contains(String, String),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    All,
}

impl Filter {
    pub fn year(year: i32) -> Self {
        Filter::Eq("year".to_string(), Value::from(year))
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::And(Box::new(self), Box::new(other))
    }

    fn matches(&self, record: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => &record.get(field).cloned().unwrap_or(Value::Null) == value,
            Filter::Contains(field, needle) => record
                .get(field)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.contains(needle.as_str())),
            Filter::And(a, b) => a.matches(record) && b.matches(record),
            Filter::Or(a, b) => a.matches(record) || b.matches(record),
            Filter::All => true,
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Paged filtered read: `(collection, filter, per_page, offset) →
    /// records`, ordered by insertion.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        per_page: u32,
        offset: u32,
    ) -> Result<Vec<Record>, CoreError>;

    /// Save either creates or updates a record depending on whether it
    /// carries an id assigned by a prior fetch. Returns the (possibly
    /// newly assigned) id.
    async fn upsert(&self, collection: &str, record: &Record) -> Result<String, CoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), CoreError>;

    /// Forces a durability sync. Failure is logged by the caller, not
    /// propagated as a sync failure (spec §3 invariants).
    async fn checkpoint(&self) -> Result<(), CoreError>;
}

/// An in-process, non-persistent `RecordStore` used by the Base Sync
/// Pattern's unit tests and by `SqliteRecordStore`'s own integration tests
/// as a baseline oracle.
#[derive(Default)]
pub struct InMemoryRecordStore {
    collections: tokio::sync::Mutex<std::collections::HashMap<String, Vec<Record>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        per_page: u32,
        offset: u32,
    ) -> Result<Vec<Record>, CoreError> {
        let guard = self.collections.lock().await;
        let all = guard.get(collection).cloned().unwrap_or_default();
        let matching: Vec<Record> = all.into_iter().filter(|r| filter.matches(&r.fields)).collect();
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(per_page as usize)
            .collect())
    }

    async fn upsert(&self, collection: &str, record: &Record) -> Result<String, CoreError> {
        let mut guard = self.collections.lock().await;
        let rows = guard.entry(collection.to_string()).or_default();

        if let Some(id) = &record.id {
            if let Some(existing) = rows.iter_mut().find(|r| r.id.as_deref() == Some(id.as_str())) {
                existing.fields = record.fields.clone();
                return Ok(id.clone());
            }
        }

        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            .to_string();
        rows.push(Record {
            id: Some(id.clone()),
            fields: record.fields.clone(),
        });
        Ok(id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), CoreError> {
        let mut guard = self.collections.lock().await;
        if let Some(rows) = guard.get_mut(collection) {
            rows.retain(|r| r.id.as_deref() != Some(id));
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Embedded, file-backed record store over `rusqlite` in WAL mode. Every
/// collection is a single table `(id INTEGER PRIMARY KEY, fields TEXT)`
/// where `fields` is the record's JSON blob — schema *evolution* is a
/// non-goal (spec §1), so this deliberately does not model per-collection
/// typed columns.
pub struct SqliteRecordStore {
    conn: tokio::sync::Mutex<rusqlite::Connection>,
}

impl SqliteRecordStore {
    pub fn open(path: &str) -> Result<Self, CoreError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| CoreError::StorageWrite(format!("open: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CoreError::StorageWrite(format!("wal: {e}")))?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    fn ensure_table(conn: &rusqlite::Connection, collection: &str) -> rusqlite::Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{collection}\" (id INTEGER PRIMARY KEY, fields TEXT NOT NULL)"
            ),
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        per_page: u32,
        offset: u32,
    ) -> Result<Vec<Record>, CoreError> {
        let conn = self.conn.lock().await;
        Self::ensure_table(&conn, collection)
            .map_err(|e| CoreError::StorageWrite(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!("SELECT id, fields FROM \"{collection}\" ORDER BY id"))
            .map_err(|e| CoreError::StorageWrite(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let fields: String = row.get(1)?;
                Ok((id, fields))
            })
            .map_err(|e| CoreError::StorageWrite(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, fields) = row.map_err(|e| CoreError::StorageWrite(e.to_string()))?;
            let fields: Value = serde_json::from_str(&fields)
                .map_err(|e| CoreError::StorageWrite(e.to_string()))?;
            if filter.matches(&fields) {
                out.push(Record {
                    id: Some(id.to_string()),
                    fields,
                });
            }
        }

        Ok(out.into_iter().skip(offset as usize).take(per_page as usize).collect())
    }

    async fn upsert(&self, collection: &str, record: &Record) -> Result<String, CoreError> {
        let conn = self.conn.lock().await;
        Self::ensure_table(&conn, collection)
            .map_err(|e| CoreError::StorageWrite(e.to_string()))?;

        let blob = serde_json::to_string(&record.fields)
            .map_err(|e| CoreError::StorageWrite(e.to_string()))?;

        match &record.id {
            Some(id) => {
                conn.execute(
                    &format!("UPDATE \"{collection}\" SET fields = ?1 WHERE id = ?2"),
                    rusqlite::params![blob, id],
                )
                .map_err(|e| CoreError::StorageWrite(e.to_string()))?;
                Ok(id.clone())
            }
            None => {
                conn.execute(
                    &format!("INSERT INTO \"{collection}\" (fields) VALUES (?1)"),
                    rusqlite::params![blob],
                )
                .map_err(|e| CoreError::StorageWrite(e.to_string()))?;
                Ok(conn.last_insert_rowid().to_string())
            }
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), CoreError> {
        let conn = self.conn.lock().await;
        Self::ensure_table(&conn, collection)
            .map_err(|e| CoreError::StorageWrite(e.to_string()))?;
        conn.execute(
            &format!("DELETE FROM \"{collection}\" WHERE id = ?1"),
            rusqlite::params![id],
        )
        .map_err(|e| CoreError::StorageWrite(e.to_string()))?;
        Ok(())
    }

    async fn checkpoint(&self) -> Result<(), CoreError> {
        let conn = self.conn.lock().await;
        conn.pragma_query(None, "wal_checkpoint(TRUNCATE)", |_| Ok(()))
            .map_err(|e| CoreError::StorageWrite(format!("checkpoint: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_create_then_update_then_delete() {
        let store = InMemoryRecordStore::new();

        let id = store
            .upsert("widgets", &Record::new(serde_json::json!({"name": "a"})))
            .await
            .unwrap();

        let found = store.find("widgets", &Filter::All, 10, 0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field("name"), serde_json::json!("a"));

        store
            .upsert(
                "widgets",
                &Record {
                    id: Some(id.clone()),
                    fields: serde_json::json!({"name": "b"}),
                },
            )
            .await
            .unwrap();

        let found = store.find("widgets", &Filter::All, 10, 0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field("name"), serde_json::json!("b"));

        store.delete("widgets", &id).await.unwrap();
        let found = store.find("widgets", &Filter::All, 10, 0).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_records_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        let store = SqliteRecordStore::open(path.to_str().unwrap()).unwrap();

        let id = store
            .upsert("campers", &Record::new(serde_json::json!({"name": "Alex", "year": 2024})))
            .await
            .unwrap();

        let found = store
            .find("campers", &Filter::year(2024), 10, 0)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_deref(), Some(id.as_str()));

        store.checkpoint().await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_filter_excludes_non_matching_year() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        let store = SqliteRecordStore::open(path.to_str().unwrap()).unwrap();

        store
            .upsert("campers", &Record::new(serde_json::json!({"name": "Alex", "year": 2023})))
            .await
            .unwrap();

        let found = store
            .find("campers", &Filter::year(2024), 10, 0)
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
