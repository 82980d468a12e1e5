//! Document and collection paths.
//!
//! A path is a `/`-separated list of non-empty segments alternating
//! collection and document ids: `stripe_customers/{uid}` is a document,
//! `stripe_customers/{uid}/payments` is a collection.

use std::fmt;

use crate::collections::{PAYMENT_METHODS, PAYMENTS, STRIPE_CUSTOMERS, USERS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,
    #[error("Path {0} contains an empty segment")]
    EmptySegment(String),
    #[error("Path {0} does not point to a document")]
    NotADocument(String),
    #[error("Path {0} does not point to a collection")]
    NotACollection(String),
}

/// A validated, normalized path (no leading or trailing slash)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    segments: Vec<String>,
}

impl DocumentPath {
    /// Parse any path, document or collection
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::EmptySegment(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Parse a path that must address a document
    pub fn document(path: &str) -> Result<Self, PathError> {
        let parsed = Self::parse(path)?;
        if !parsed.is_document() {
            return Err(PathError::NotADocument(path.to_string()));
        }
        Ok(parsed)
    }

    /// Parse a path that must address a collection
    pub fn collection(path: &str) -> Result<Self, PathError> {
        let parsed = Self::parse(path)?;
        if parsed.is_document() {
            return Err(PathError::NotACollection(path.to_string()));
        }
        Ok(parsed)
    }

    pub fn is_document(&self) -> bool {
        self.segments.len() % 2 == 0
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment: the document id or collection name
    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Append a segment
    pub fn child(&self, segment: &str) -> DocumentPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    /// Whether `self` equals `prefix` or lives underneath it
    pub fn starts_with(&self, prefix: &DocumentPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// `stripe_customers/{user_id}`
pub fn customer_path(user_id: &str) -> String {
    format!("{}/{}", STRIPE_CUSTOMERS, user_id)
}

/// `stripe_customers/{user_id}/payment_methods`
pub fn payment_methods_path(user_id: &str) -> String {
    format!("{}/{}/{}", STRIPE_CUSTOMERS, user_id, PAYMENT_METHODS)
}

/// `stripe_customers/{user_id}/payments`
pub fn payments_path(user_id: &str) -> String {
    format!("{}/{}/{}", STRIPE_CUSTOMERS, user_id, PAYMENTS)
}

/// `stripe_customers/{user_id}/payment_methods/{push_id}`
pub fn payment_method_path(user_id: &str, push_id: &str) -> String {
    format!("{}/{}", payment_methods_path(user_id), push_id)
}

/// `stripe_customers/{user_id}/payments/{push_id}`
pub fn payment_path(user_id: &str, push_id: &str) -> String {
    format!("{}/{}", payments_path(user_id), push_id)
}

/// `users/{user_id}`
pub fn user_path(user_id: &str) -> String {
    format!("{}/{}", USERS, user_id)
}

/// Documents the payment handlers react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPath {
    PaymentMethod { user_id: String, push_id: String },
    Payment { user_id: String, push_id: String },
    Other,
}

impl TriggerPath {
    pub fn classify(path: &DocumentPath) -> Self {
        match path.segments() {
            [root, user_id, sub, push_id] if root == STRIPE_CUSTOMERS && sub == PAYMENT_METHODS => {
                TriggerPath::PaymentMethod {
                    user_id: user_id.clone(),
                    push_id: push_id.clone(),
                }
            }
            [root, user_id, sub, push_id] if root == STRIPE_CUSTOMERS && sub == PAYMENTS => {
                TriggerPath::Payment {
                    user_id: user_id.clone(),
                    push_id: push_id.clone(),
                }
            }
            _ => TriggerPath::Other,
        }
    }
}
