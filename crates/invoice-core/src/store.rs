//! Invoice Store
//!
//! In-memory invoice cache backed by a durable document.
//!
//! The cache answers "did this process create invoice X" in O(1). Every
//! insert rewrites the durable document before returning, and a failed
//! write leaves the record cached but marked as unpersisted until a later
//! insert or [`InvoiceStore::flush`] writes it out.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::backend::StoreBackend;
use crate::error::{CoreError, Result};
use crate::invoice::InvoiceRecord;

#[derive(Debug, Default)]
struct Inner {
    /// Records in insertion order (the durable document shape)
    records: Vec<InvoiceRecord>,
    /// id -> position in `records`
    index: HashMap<String, usize>,
    /// Cached ids whose durable write has not succeeded yet
    unpersisted: BTreeSet<String>,
}

impl Inner {
    fn push(&mut self, record: InvoiceRecord) {
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
    }
}

/// Invoice cache + persistent store
pub struct InvoiceStore {
    backend: Arc<dyn StoreBackend>,
    inner: RwLock<Inner>,
}

impl InvoiceStore {
    /// Build the cache from the backend's document.
    ///
    /// A missing or blank document yields an empty store. Anything else
    /// must be a JSON array of objects with unique string `id`s.
    pub async fn load(backend: Arc<dyn StoreBackend>) -> Result<Self> {
        let location = backend.location();

        let bytes = backend
            .read()
            .await
            .map_err(|e| CoreError::store_load(&location, e))?;

        let mut inner = Inner::default();

        if let Some(bytes) = bytes.filter(|b| !b.iter().all(u8::is_ascii_whitespace)) {
            let document: Value = serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::store_load(&location, format!("malformed JSON: {e}")))?;

            let Value::Array(entries) = document else {
                return Err(CoreError::store_load(
                    &location,
                    "expected a JSON array of invoice records",
                ));
            };

            for (position, entry) in entries.into_iter().enumerate() {
                if !entry.get("id").is_some_and(Value::is_string) {
                    return Err(CoreError::store_load(
                        &location,
                        format!("record #{position} has no string `id`"),
                    ));
                }

                let record: InvoiceRecord = serde_json::from_value(entry).map_err(|e| {
                    CoreError::store_load(&location, format!("record #{position}: {e}"))
                })?;

                if inner.index.contains_key(&record.id) {
                    return Err(CoreError::store_load(
                        &location,
                        format!("duplicate invoice id {}", record.id),
                    ));
                }

                inner.push(record);
            }
        }

        tracing::info!(
            location = %location,
            invoices = inner.records.len(),
            "Loaded invoice store"
        );

        Ok(Self {
            backend,
            inner: RwLock::new(inner),
        })
    }

    /// Look up an invoice by id
    pub async fn get(&self, id: &str) -> Option<InvoiceRecord> {
        let inner = self.inner.read().await;
        inner.index.get(id).map(|&pos| inner.records[pos].clone())
    }

    /// Check whether an invoice id is tracked
    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.index.contains_key(id)
    }

    /// Track a new invoice and write the durable document.
    ///
    /// On `CoreError::Persistence` the record is still cached; it shows up
    /// in [`InvoiceStore::unpersisted`] until a write succeeds.
    pub async fn insert(&self, record: InvoiceRecord) -> Result<()> {
        let mut inner = self.inner.write().await;

        if inner.index.contains_key(&record.id) {
            return Err(CoreError::DuplicateInvoice(record.id));
        }

        let id = record.id.clone();
        inner.unpersisted.insert(id.clone());
        inner.push(record);

        self.persist(&mut inner).await?;

        tracing::debug!(invoice_id = %id, "Persisted invoice");
        Ok(())
    }

    /// Rewrite the durable document from the cache.
    ///
    /// Returns how many previously unpersisted invoices were written.
    pub async fn flush(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let pending = inner.unpersisted.len();

        self.persist(&mut inner).await?;

        if pending > 0 {
            tracing::info!(invoices = pending, "Backfilled unpersisted invoices");
        }
        Ok(pending)
    }

    /// Ids that are cached but not yet durable
    pub async fn unpersisted(&self) -> Vec<String> {
        self.inner.read().await.unpersisted.iter().cloned().collect()
    }

    /// Snapshot of all records in insertion order
    pub async fn records(&self) -> Vec<InvoiceRecord> {
        self.inner.read().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Where the durable document lives
    pub fn location(&self) -> String {
        self.backend.location()
    }

    async fn persist(&self, inner: &mut Inner) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&inner.records)?;

        match self.backend.write(&bytes).await {
            Ok(()) => {
                inner.unpersisted.clear();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    location = %self.backend.location(),
                    unpersisted = inner.unpersisted.len(),
                    error = %e,
                    "Invoice store write failed"
                );
                Err(CoreError::Persistence(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{JsonFileBackend, MemoryBackend};

    fn record(id: &str) -> InvoiceRecord {
        InvoiceRecord::new(id).with("amount", "10.00")
    }

    #[tokio::test]
    async fn test_load_indexes_every_record() {
        let backend = Arc::new(MemoryBackend::with_document(
            r#"[{"id":"INV-001","key":"value"},{"id":"INV-002"}]"#,
        ));
        let store = InvoiceStore::load(backend).await.unwrap();

        assert_eq!(store.len().await, 2);
        let first = store.get("INV-001").await.unwrap();
        assert_eq!(first.get_str("key"), Some("value"));
        assert!(store.get("INV-002").await.is_some());
    }

    #[tokio::test]
    async fn test_missing_and_blank_documents_are_empty() {
        let store = InvoiceStore::load(Arc::new(MemoryBackend::new())).await.unwrap();
        assert!(store.is_empty().await);

        let store = InvoiceStore::load(Arc::new(MemoryBackend::with_document("  \n")))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = InvoiceStore::load(Arc::new(MemoryBackend::with_document("[]")))
            .await
            .unwrap();

        assert!(store.get("UNKNOWN-1").await.is_none());
        assert!(!store.contains("UNKNOWN-1").await);
    }

    #[tokio::test]
    async fn test_lookup_is_stable() {
        let backend = Arc::new(MemoryBackend::with_document(r#"[{"id":"INV-001"}]"#));
        let store = InvoiceStore::load(backend).await.unwrap();

        assert_eq!(store.get("INV-001").await, store.get("INV-001").await);
        assert_eq!(store.get("nope").await, store.get("nope").await);
    }

    #[tokio::test]
    async fn test_malformed_documents_fail_to_load() {
        for doc in [
            "{not json",
            r#"{"INV-001":{"id":"INV-001"}}"#,
            r#"[{"key":"value"}]"#,
            r#"[{"id":42}]"#,
            r#"[{"id":"INV-001"},{"id":"INV-001"}]"#,
        ] {
            let backend = Arc::new(MemoryBackend::with_document(doc));
            let err = InvoiceStore::load(backend).await.err().unwrap();
            assert!(matches!(err, CoreError::StoreLoad { .. }), "{doc}: {err}");
        }
    }

    #[tokio::test]
    async fn test_insert_then_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoices.json");

        let store = InvoiceStore::load(Arc::new(JsonFileBackend::new(&path)))
            .await
            .unwrap();
        store.insert(record("INV-001")).await.unwrap();
        store.insert(record("INV-002")).await.unwrap();

        let reloaded = InvoiceStore::load(Arc::new(JsonFileBackend::new(&path)))
            .await
            .unwrap();
        assert_eq!(reloaded.get("INV-001").await, Some(record("INV-001")));
        assert_eq!(reloaded.records().await, store.records().await);
    }

    #[tokio::test]
    async fn test_document_is_a_flat_array() {
        let backend = Arc::new(MemoryBackend::new());
        let store = InvoiceStore::load(backend.clone()).await.unwrap();
        store.insert(record("INV-001")).await.unwrap();

        let doc: Value = serde_json::from_slice(&backend.document().await.unwrap()).unwrap();
        assert_eq!(doc, serde_json::json!([{"id": "INV-001", "amount": "10.00"}]));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InvoiceStore::load(Arc::new(MemoryBackend::new())).await.unwrap();
        store.insert(record("INV-001")).await.unwrap();

        let err = store.insert(record("INV-001")).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateInvoice(id) if id == "INV-001"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_inspectable() {
        let backend = Arc::new(MemoryBackend::with_document("[]"));
        let store = InvoiceStore::load(backend.clone()).await.unwrap();

        backend.set_fail_writes(true);
        let err = store.insert(record("INV-001")).await.unwrap_err();
        assert!(matches!(err, CoreError::Persistence(_)));
        assert!(err.is_retryable());

        // Cached but not durable
        assert!(store.get("INV-001").await.is_some());
        assert_eq!(store.unpersisted().await, vec!["INV-001".to_string()]);
        assert_eq!(backend.document().await.as_deref(), Some(&b"[]"[..]));
    }

    #[tokio::test]
    async fn test_flush_backfills_unpersisted() {
        let backend = Arc::new(MemoryBackend::new());
        let store = InvoiceStore::load(backend.clone()).await.unwrap();

        backend.set_fail_writes(true);
        assert!(store.insert(record("INV-001")).await.is_err());
        assert!(store.flush().await.is_err());

        backend.set_fail_writes(false);
        assert_eq!(store.flush().await.unwrap(), 1);
        assert!(store.unpersisted().await.is_empty());

        let reloaded = InvoiceStore::load(backend).await.unwrap();
        assert!(reloaded.get("INV-001").await.is_some());
    }
}
