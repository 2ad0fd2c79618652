//! Listing store abstraction.
//!
//! The harmonization engine does not own listing documents; it reads samples
//! for profiling, scans batches for apply, and writes renamed field maps
//! back. The [`ListingStore`] trait captures exactly that surface, with a
//! SQLite backend for production and an in-memory backend for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::error::HarmonizerError;
use crate::models::{DocumentError, ListingDocument, NewListing};

/// Result of upserting one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The dedup hash matched the stored row; nothing was written.
    Unchanged,
}

/// One document's renamed field map, to be written back by apply.
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub id: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Storage surface the engine needs from the listing store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](ListingStore::upsert) | Insert or refresh a scraped listing |
/// | [`count`](ListingStore::count) | Total listings, for progress totals |
/// | [`sample`](ListingStore::sample) | Deterministic sample for profiling |
/// | [`scan_after`](ListingStore::scan_after) | Keyset-paginated batch scan |
/// | [`write_fields`](ListingStore::write_fields) | Write renamed field maps |
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn upsert(&self, listing: &NewListing) -> Result<UpsertOutcome, HarmonizerError>;

    async fn count(&self) -> Result<u64, HarmonizerError>;

    async fn sample(&self, n: u32) -> Result<Vec<ListingDocument>, HarmonizerError>;

    /// Return up to `limit` documents with id strictly greater than `cursor`,
    /// ordered by id. Keyset pagination keeps the scan stable while apply
    /// rewrites rows behind the cursor.
    async fn scan_after(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ListingDocument>, HarmonizerError>;

    /// Write renamed field maps. Each document write is atomic on its own;
    /// failures are returned per document and never abort the batch.
    async fn write_fields(
        &self,
        updates: &[FieldUpdate],
    ) -> Result<Vec<DocumentError>, HarmonizerError>;

    async fn get(&self, id: &str) -> Result<Option<ListingDocument>, HarmonizerError>;
}

// ============ SQLite backend ============

pub struct SqliteListingStore {
    pool: SqlitePool,
}

impl SqliteListingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<ListingDocument, HarmonizerError> {
        let fields_json: String = row.get("fields_json");
        let fields: BTreeMap<String, serde_json::Value> = serde_json::from_str(&fields_json)?;
        Ok(ListingDocument {
            id: row.get("id"),
            source: row.get("source"),
            source_id: row.get("source_id"),
            fields,
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ListingStore for SqliteListingStore {
    async fn upsert(&self, listing: &NewListing) -> Result<UpsertOutcome, HarmonizerError> {
        let existing: Option<(String, String)> = sqlx::query_as(
            "SELECT id, dedup_hash FROM listings WHERE source = ? AND source_id = ?",
        )
        .bind(&listing.source)
        .bind(&listing.source_id)
        .fetch_optional(&self.pool)
        .await?;

        let now = chrono::Utc::now().timestamp();
        let fields_json = serde_json::to_string(&listing.fields)?;
        let raw_json = serde_json::to_string(&listing.raw)?;

        match existing {
            Some((_, hash)) if hash == listing.dedup_hash => Ok(UpsertOutcome::Unchanged),
            Some((id, _)) => {
                sqlx::query(
                    r#"
                    UPDATE listings
                    SET fields_json = ?, raw_json = ?, dedup_hash = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&fields_json)
                .bind(&raw_json)
                .bind(&listing.dedup_hash)
                .bind(now)
                .bind(&id)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO listings
                        (id, source, source_id, fields_json, raw_json, dedup_hash, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&listing.source)
                .bind(&listing.source_id)
                .bind(&fields_json)
                .bind(&raw_json)
                .bind(&listing.dedup_hash)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn count(&self) -> Result<u64, HarmonizerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn sample(&self, n: u32) -> Result<Vec<ListingDocument>, HarmonizerError> {
        let rows = sqlx::query("SELECT * FROM listings ORDER BY id LIMIT ?")
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn scan_after(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ListingDocument>, HarmonizerError> {
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query("SELECT * FROM listings WHERE id > ? ORDER BY id LIMIT ?")
                    .bind(cursor)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM listings ORDER BY id LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn write_fields(
        &self,
        updates: &[FieldUpdate],
    ) -> Result<Vec<DocumentError>, HarmonizerError> {
        let now = chrono::Utc::now().timestamp();
        let mut failures = Vec::new();

        for update in updates {
            let fields_json = match serde_json::to_string(&update.fields) {
                Ok(json) => json,
                Err(e) => {
                    failures.push(DocumentError {
                        document_id: update.id.clone(),
                        message: format!("serialize fields: {}", e),
                    });
                    continue;
                }
            };
            let result = sqlx::query("UPDATE listings SET fields_json = ?, updated_at = ? WHERE id = ?")
                .bind(&fields_json)
                .bind(now)
                .bind(&update.id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                failures.push(DocumentError {
                    document_id: update.id.clone(),
                    message: "listing disappeared during apply".to_string(),
                });
            }
        }

        Ok(failures)
    }

    async fn get(&self, id: &str) -> Result<Option<ListingDocument>, HarmonizerError> {
        let row = sqlx::query("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_document).transpose()
    }
}

// ============ In-memory backend ============

/// In-memory listing store for unit and integration tests.
///
/// `fail_writes` injects per-document write failures so the applier's
/// partial-failure policy can be exercised without a broken database.
#[derive(Default)]
pub struct MemoryListingStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    documents: BTreeMap<String, ListingDocument>,
    by_source: BTreeMap<(String, String), String>,
    hashes: BTreeMap<String, String>,
    fail_writes: HashSet<String>,
    next_id: u64,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future `write_fields` calls fail for this document id.
    pub fn fail_writes_for(&self, id: &str) {
        self.inner.lock().unwrap().fail_writes.insert(id.to_string());
    }

    /// All documents, ordered by id. Test helper.
    pub fn documents(&self) -> Vec<ListingDocument> {
        self.inner.lock().unwrap().documents.values().cloned().collect()
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn upsert(&self, listing: &NewListing) -> Result<UpsertOutcome, HarmonizerError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (listing.source.clone(), listing.source_id.clone());
        let now = chrono::Utc::now().timestamp();

        if let Some(id) = inner.by_source.get(&key).cloned() {
            if inner.hashes.get(&id) == Some(&listing.dedup_hash) {
                return Ok(UpsertOutcome::Unchanged);
            }
            inner.hashes.insert(id.clone(), listing.dedup_hash.clone());
            let doc = inner.documents.get_mut(&id).expect("index points at document");
            doc.fields = listing.fields.clone();
            doc.updated_at = now;
            return Ok(UpsertOutcome::Updated);
        }

        // Sequential zero-padded ids keep scan order equal to insert order,
        // which the tests rely on.
        inner.next_id += 1;
        let id = format!("mem-{:08}", inner.next_id);
        inner.by_source.insert(key, id.clone());
        inner.hashes.insert(id.clone(), listing.dedup_hash.clone());
        inner.documents.insert(
            id.clone(),
            ListingDocument {
                id,
                source: listing.source.clone(),
                source_id: listing.source_id.clone(),
                fields: listing.fields.clone(),
                updated_at: now,
            },
        );
        Ok(UpsertOutcome::Inserted)
    }

    async fn count(&self) -> Result<u64, HarmonizerError> {
        Ok(self.inner.lock().unwrap().documents.len() as u64)
    }

    async fn sample(&self, n: u32) -> Result<Vec<ListingDocument>, HarmonizerError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.documents.values().take(n as usize).cloned().collect())
    }

    async fn scan_after(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<ListingDocument>, HarmonizerError> {
        let inner = self.inner.lock().unwrap();
        let documents = inner
            .documents
            .values()
            .filter(|doc| cursor.map_or(true, |c| doc.id.as_str() > c))
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(documents)
    }

    async fn write_fields(
        &self,
        updates: &[FieldUpdate],
    ) -> Result<Vec<DocumentError>, HarmonizerError> {
        let mut inner = self.inner.lock().unwrap();
        let now = chrono::Utc::now().timestamp();
        let mut failures = Vec::new();

        for update in updates {
            if inner.fail_writes.contains(&update.id) {
                failures.push(DocumentError {
                    document_id: update.id.clone(),
                    message: "injected write failure".to_string(),
                });
                continue;
            }
            match inner.documents.get_mut(&update.id) {
                Some(doc) => {
                    doc.fields = update.fields.clone();
                    doc.updated_at = now;
                }
                None => failures.push(DocumentError {
                    document_id: update.id.clone(),
                    message: "listing disappeared during apply".to_string(),
                }),
            }
        }

        Ok(failures)
    }

    async fn get(&self, id: &str) -> Result<Option<ListingDocument>, HarmonizerError> {
        Ok(self.inner.lock().unwrap().documents.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing(source_id: &str, fields: serde_json::Value, hash: &str) -> NewListing {
        let map: BTreeMap<String, serde_json::Value> = fields
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        NewListing {
            source: "test".to_string(),
            source_id: source_id.to_string(),
            fields: map.clone(),
            raw: map,
            dedup_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn memory_upsert_tracks_changes() {
        let store = MemoryListingStore::new();
        let outcome = store
            .upsert(&listing("1", json!({"price": 100}), "h1"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = store
            .upsert(&listing("1", json!({"price": 100}), "h1"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let outcome = store
            .upsert(&listing("1", json!({"price": 120}), "h2"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_scan_pages_through_everything() {
        let store = MemoryListingStore::new();
        for i in 0..7 {
            store
                .upsert(&listing(&i.to_string(), json!({"n": i}), &format!("h{}", i)))
                .await
                .unwrap();
        }

        let mut seen = 0;
        let mut cursor: Option<String> = None;
        loop {
            let batch = store.scan_after(cursor.as_deref(), 3).await.unwrap();
            if batch.is_empty() {
                break;
            }
            seen += batch.len();
            cursor = batch.last().map(|doc| doc.id.clone());
        }
        assert_eq!(seen, 7);
    }

    #[tokio::test]
    async fn memory_write_failures_are_reported_not_fatal() {
        let store = MemoryListingStore::new();
        store
            .upsert(&listing("1", json!({"price": 100}), "h1"))
            .await
            .unwrap();
        let id = store.documents()[0].id.clone();
        store.fail_writes_for(&id);

        let failures = store
            .write_fields(&[FieldUpdate {
                id: id.clone(),
                fields: BTreeMap::new(),
            }])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].document_id, id);
    }
}
