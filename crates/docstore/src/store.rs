//! In-memory document storage.
//!
//! Provides a thread-safe document map keyed by normalized path, with a
//! broadcast channel publishing every write.

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use storefront_types::{DocumentPath, PathError};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    push_id::PushIdGenerator,
    types::{ChangeKind, Document, DocumentChange, SetOptions},
};

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidPath(#[from] PathError),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document {0} is not a JSON object")]
    NotAnObject(String),

    #[error("Failed to convert document {path}: {source}")]
    Conversion {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
enum BatchOp {
    Set {
        path: DocumentPath,
        data: Document,
        options: SetOptions,
    },
    Delete {
        path: DocumentPath,
    },
}

/// A set of writes applied atomically by [`DocumentStore::commit`]
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an overwrite (or merge) of a document
    pub fn set_with(
        &mut self,
        path: &str,
        data: Document,
        options: SetOptions,
    ) -> Result<&mut Self, StoreError> {
        let path = DocumentPath::document(path)?;
        self.ops.push(BatchOp::Set {
            path,
            data,
            options,
        });
        Ok(self)
    }

    /// Queue an overwrite of a document
    pub fn set(&mut self, path: &str, data: Document) -> Result<&mut Self, StoreError> {
        self.set_with(path, data, SetOptions::default())
    }

    /// Queue a delete of a document
    pub fn delete(&mut self, path: &str) -> Result<&mut Self, StoreError> {
        let path = DocumentPath::document(path)?;
        self.ops.push(BatchOp::Delete { path });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// In-memory document store with change notifications.
pub struct DocumentStore {
    /// Documents indexed by normalized path
    documents: RwLock<BTreeMap<String, Document>>,
    /// Broadcast channel for change notifications
    notify_tx: broadcast::Sender<DocumentChange>,
    push_ids: PushIdGenerator,
}

impl DocumentStore {
    /// Create a new empty document store.
    pub fn new() -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Arc::new(Self {
            documents: RwLock::new(BTreeMap::new()),
            notify_tx,
            push_ids: PushIdGenerator::new(),
        })
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.notify_tx.subscribe()
    }

    /// Generate a fresh push id.
    pub fn push_id(&self) -> String {
        self.push_ids.next_id()
    }

    /// Get a document by path.
    pub fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let path = DocumentPath::document(path)?;
        Ok(self.documents.read().get(&path.to_string()).cloned())
    }

    /// Get a document and deserialize it.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
        match self.get(path)? {
            Some(doc) => serde_json::from_value(serde_json::Value::Object(doc))
                .map(Some)
                .map_err(|source| StoreError::Conversion {
                    path: path.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Check if a document exists.
    pub fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let path = DocumentPath::document(path)?;
        Ok(self.documents.read().contains_key(&path.to_string()))
    }

    /// Overwrite a document.
    pub fn set(&self, path: &str, data: Document) -> Result<(), StoreError> {
        self.set_with(path, data, SetOptions::default())
    }

    /// Write a document, replacing or merging depending on `options`.
    pub fn set_with(&self, path: &str, data: Document, options: SetOptions) -> Result<(), StoreError> {
        let path = DocumentPath::document(path)?;
        let mut documents = self.documents.write();
        let change = apply_set(&mut documents, &path, data, options);
        self.emit(change);
        Ok(())
    }

    /// Serialize a value and overwrite a document with it.
    pub fn set_from<T: Serialize>(&self, path: &str, value: &T) -> Result<(), StoreError> {
        let data = to_document(path, value)?;
        self.set(path, data)
    }

    /// Create a document under a fresh push id, returning the id.
    pub fn add(&self, collection: &str, data: Document) -> Result<String, StoreError> {
        let collection = DocumentPath::collection(collection)?;
        let id = self.push_id();
        let path = collection.child(&id);

        let mut documents = self.documents.write();
        let change = apply_set(&mut documents, &path, data, SetOptions::default());
        self.emit(change);

        debug!(path = %path, "Added document");
        Ok(id)
    }

    /// Delete a document. Returns whether it existed.
    pub fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let path = DocumentPath::document(path)?;
        let mut documents = self.documents.write();
        match apply_delete(&mut documents, &path) {
            Some(change) => {
                self.emit(change);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// List the documents directly inside a collection, ordered by id.
    pub fn list(&self, collection: &str) -> Result<Vec<(String, Document)>, StoreError> {
        let collection = DocumentPath::collection(collection)?;
        let prefix = format!("{}/", collection);
        let documents = self.documents.read();

        let children = documents
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, doc)| (key[prefix.len()..].to_string(), doc.clone()))
            .collect();

        Ok(children)
    }

    /// Documents in a collection whose top-level `field` equals `value`.
    pub fn where_eq(
        &self,
        collection: &str,
        field: &str,
        value: &serde_json::Value,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Document)>, StoreError> {
        let matches = self
            .list(collection)?
            .into_iter()
            .filter(|(_, doc)| doc.get(field) == Some(value))
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(matches)
    }

    /// Start a new write batch.
    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Apply every write of a batch under a single lock.
    pub fn commit(&self, batch: WriteBatch) -> usize {
        let mut documents = self.documents.write();
        let mut applied = 0;

        for op in batch.ops {
            let change = match op {
                BatchOp::Set {
                    path,
                    data,
                    options,
                } => Some(apply_set(&mut documents, &path, data, options)),
                BatchOp::Delete { path } => apply_delete(&mut documents, &path),
            };
            if let Some(change) = change {
                self.emit(change);
                applied += 1;
            }
        }

        debug!(writes = applied, "Committed batch");
        applied
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn emit(&self, change: DocumentChange) {
        // No subscribers is not an error
        let _ = self.notify_tx.send(change);
    }
}

fn apply_set(
    documents: &mut BTreeMap<String, Document>,
    path: &DocumentPath,
    data: Document,
    options: SetOptions,
) -> DocumentChange {
    let key = path.to_string();
    let before = documents.get(&key).cloned();

    let after = match (&before, options.merge) {
        (Some(existing), true) => {
            let mut merged = existing.clone();
            merged.extend(data);
            merged
        }
        _ => data,
    };

    documents.insert(key.clone(), after.clone());

    DocumentChange {
        path: key,
        kind: if before.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        },
        before,
        after: Some(after),
        timestamp: Utc::now().timestamp_millis(),
    }
}

fn apply_delete(
    documents: &mut BTreeMap<String, Document>,
    path: &DocumentPath,
) -> Option<DocumentChange> {
    let key = path.to_string();
    documents.remove(&key).map(|before| DocumentChange {
        path: key,
        kind: ChangeKind::Deleted,
        before: Some(before),
        after: None,
        timestamp: Utc::now().timestamp_millis(),
    })
}

fn to_document<T: Serialize>(path: &str, value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::NotAnObject(path.to_string())),
        Err(source) => Err(StoreError::Conversion {
            path: path.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storefront_types::{CustomerRecord, paths::customer_path};

    use super::*;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let store = DocumentStore::new();
        store
            .set("stripe_customers/u1", doc(json!({ "customer_id": "cus_1" })))
            .unwrap();

        let fetched = store.get("stripe_customers/u1").unwrap().unwrap();
        assert_eq!(fetched.get("customer_id"), Some(&json!("cus_1")));
        assert!(store.get("stripe_customers/u2").unwrap().is_none());
    }

    #[test]
    fn test_set_rejects_collection_path() {
        let store = DocumentStore::new();
        let result = store.set("stripe_customers", Document::new());
        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_set_overwrites_and_merge_extends() {
        let store = DocumentStore::new();
        let path = "stripe_customers/u1/payments/p1";
        store
            .set(path, doc(json!({ "amount": 100, "currency": "usd" })))
            .unwrap();

        store
            .set_with(path, doc(json!({ "error": "declined" })), SetOptions::merge())
            .unwrap();
        let merged = store.get(path).unwrap().unwrap();
        assert_eq!(merged.get("amount"), Some(&json!(100)));
        assert_eq!(merged.get("error"), Some(&json!("declined")));

        store.set(path, doc(json!({ "id": "pi_1" }))).unwrap();
        let replaced = store.get(path).unwrap().unwrap();
        assert_eq!(replaced.len(), 1);
    }

    #[test]
    fn test_merge_creates_missing_document() {
        let store = DocumentStore::new();
        store
            .set_with("a/b", doc(json!({ "x": 1 })), SetOptions::merge())
            .unwrap();
        assert!(store.exists("a/b").unwrap());
    }

    #[test]
    fn test_changes_report_kind_and_snapshots() {
        let store = DocumentStore::new();
        let mut rx = store.subscribe();

        store.set("a/b", doc(json!({ "v": 1 }))).unwrap();
        store.set("a/b", doc(json!({ "v": 2 }))).unwrap();
        store.delete("a/b").unwrap();

        let created = rx.try_recv().unwrap();
        assert_eq!(created.kind, ChangeKind::Created);
        assert!(created.before.is_none());

        let updated = rx.try_recv().unwrap();
        assert_eq!(updated.kind, ChangeKind::Updated);
        assert_eq!(updated.before.unwrap().get("v"), Some(&json!(1)));
        assert_eq!(updated.after.unwrap().get("v"), Some(&json!(2)));

        let deleted = rx.try_recv().unwrap();
        assert_eq!(deleted.kind, ChangeKind::Deleted);
        assert!(deleted.after.is_none());
    }

    #[test]
    fn test_delete_missing_document_is_silent() {
        let store = DocumentStore::new();
        let mut rx = store.subscribe();
        assert!(!store.delete("a/b").unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_add_uses_ordered_push_ids() {
        let store = DocumentStore::new();
        let first = store.add("a/b/c", doc(json!({ "n": 1 }))).unwrap();
        let second = store.add("a/b/c", doc(json!({ "n": 2 }))).unwrap();
        assert!(first < second);

        let listed = store.list("a/b/c").unwrap();
        let ids: Vec<&str> = listed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    }

    #[test]
    fn test_list_returns_direct_children_only() {
        let store = DocumentStore::new();
        store.set("stripe_customers/u1", Document::new()).unwrap();
        store
            .set("stripe_customers/u1/payments/p1", Document::new())
            .unwrap();
        store.set("stripe_customers/u2", Document::new()).unwrap();
        store.set("stripe_customersx/u3", Document::new()).unwrap();

        let customers = store.list("stripe_customers").unwrap();
        let ids: Vec<&str> = customers.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);

        let payments = store.list("stripe_customers/u1/payments").unwrap();
        assert_eq!(payments.len(), 1);
    }

    #[test]
    fn test_where_eq_with_limit() {
        let store = DocumentStore::new();
        for (id, featured) in [("p1", true), ("p2", false), ("p3", true), ("p4", true)] {
            store
                .set(&format!("products/{}", id), doc(json!({ "isFeatured": featured })))
                .unwrap();
        }

        let featured = store
            .where_eq("products", "isFeatured", &json!(true), Some(2))
            .unwrap();
        let ids: Vec<&str> = featured.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[test]
    fn test_batch_commit_applies_all_writes() {
        let store = DocumentStore::new();
        store.set("a/1", Document::new()).unwrap();
        store.set("a/2", Document::new()).unwrap();
        let mut rx = store.subscribe();

        let mut batch = store.batch();
        batch.delete("a/1").unwrap().delete("a/2").unwrap();
        batch.set("a/3", doc(json!({ "n": 3 }))).unwrap();
        batch.delete("a/404").unwrap();
        assert_eq!(batch.len(), 4);

        assert_eq!(store.commit(batch), 3);
        assert_eq!(store.len(), 1);

        let kinds: Vec<ChangeKind> = (0..3).map(|_| rx.try_recv().unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Deleted, ChangeKind::Deleted, ChangeKind::Created]
        );
    }

    #[test]
    fn test_typed_helpers() {
        let store = DocumentStore::new();
        let record = CustomerRecord {
            customer_id: "cus_1".to_string(),
            setup_secret: Some("seti_1_secret".to_string()),
        };
        store.set_from(&customer_path("u1"), &record).unwrap();

        let fetched: CustomerRecord = store.get_as(&customer_path("u1")).unwrap().unwrap();
        assert_eq!(fetched, record);

        let wrong: Result<Option<CustomerRecord>, _> = {
            store.set("x/y", doc(json!({ "other": true }))).unwrap();
            store.get_as("x/y")
        };
        assert!(matches!(wrong, Err(StoreError::Conversion { .. })));

        let scalar = store.set_from("x/z", &42);
        assert!(matches!(scalar, Err(StoreError::NotAnObject(_))));
    }
}
