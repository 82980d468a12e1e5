//! Types for the document store.

use serde::{Deserialize, Serialize};
use storefront_types::{DocumentPath, TriggerPath};

/// A stored document: a JSON object
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Options for [`crate::DocumentStore::set_with`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Shallow-merge top-level fields into the existing document instead of replacing it
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// What happened to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Notification published after every successful write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChange {
    /// Normalized document path
    pub path: String,
    pub kind: ChangeKind,
    /// Document contents before the write (None on create)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Document>,
    /// Document contents after the write (None on delete)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Document>,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

impl DocumentChange {
    /// Parsed path of the changed document
    pub fn document_path(&self) -> Option<DocumentPath> {
        DocumentPath::document(&self.path).ok()
    }

    /// Classify the changed document for trigger routing
    pub fn trigger(&self) -> TriggerPath {
        self.document_path()
            .map(|path| TriggerPath::classify(&path))
            .unwrap_or(TriggerPath::Other)
    }

    /// Whether the change happened at or below `prefix`
    pub fn is_under(&self, prefix: &DocumentPath) -> bool {
        DocumentPath::parse(&self.path)
            .map(|path| path.starts_with(prefix))
            .unwrap_or(false)
    }
}
