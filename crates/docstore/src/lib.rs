//! Storefront document store
//!
//! An in-memory document database holding JSON documents under
//! `collection/document/collection/document` paths, with write
//! notifications that drive the payment triggers.
//!
//! # Features
//!
//! - **Documents and sub-collections**: set, merge, add under a push id, delete, list
//! - **Atomic batches**: several writes committed under a single lock
//! - **Change feed**: every write is published as a [`DocumentChange`]
//! - **HTTP surface**: REST access plus a Server-Sent Events change stream
//!
//! # Example
//!
//! ```rust
//! use storefront_docstore::DocumentStore;
//!
//! let store = DocumentStore::new();
//! let mut changes = store.subscribe();
//!
//! let id = store
//!     .add(
//!         "stripe_customers/u1/payments",
//!         serde_json::json!({ "amount": 1000, "currency": "usd" })
//!             .as_object()
//!             .cloned()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let change = changes.try_recv().unwrap();
//! assert_eq!(change.path, format!("stripe_customers/u1/payments/{}", id));
//! ```
//!
//! # Protocol
//!
//! ## Writing a document
//!
//! ```text
//! PUT /stripe_customers/u1/payment_methods/-Nx0abc HTTP/1.1
//! Content-Type: application/json
//!
//! {"id": "pm_card_visa"}
//!
//! Response: 200 OK
//! ```
//!
//! ## Adding to a collection
//!
//! ```text
//! POST /stripe_customers/u1/payments HTTP/1.1
//! Content-Type: application/json
//!
//! {"amount": 1000, "currency": "usd", "payment_method": "pm_123"}
//!
//! Response: 201 Created
//! {"id": "-Nx0abcdEFGHijklmnop", "path": "stripe_customers/u1/payments/-Nx0abcdEFGHijklmnop"}
//! ```
//!
//! ## Watching changes
//!
//! ```text
//! GET /listen?prefix=stripe_customers/u1 HTTP/1.1
//! Accept: text/event-stream
//!
//! event: change
//! data: {"path": "stripe_customers/u1/payments/-Nx0...", "kind": "updated", ...}
//! ```

pub mod push_id;
pub mod server;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use server::create_router;
pub use store::{DocumentStore, StoreError, WriteBatch};
pub use types::{ChangeKind, Document, DocumentChange, SetOptions};
