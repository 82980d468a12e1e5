//! HTTP surface of the document store.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures::stream::Stream;
use serde::Deserialize;
use storefront_types::DocumentPath;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::{
    store::{DocumentStore, StoreError},
    types::{Document, SetOptions},
};

/// Query parameters for the change stream.
#[derive(Debug, Deserialize)]
pub struct ListenQuery {
    /// Only stream changes at or below this path
    pub prefix: Option<String>,
}

/// Create the router with all document endpoints.
pub fn create_router(store: Arc<DocumentStore>) -> Router<()> {
    Router::new()
        .route("/listen", get(handle_listen))
        .route(
            "/{*path}",
            get(handle_get)
                .put(handle_put)
                .patch(handle_patch)
                .post(handle_add)
                .delete(handle_delete),
        )
        .with_state(store)
}

fn error_response(status: StatusCode, message: String, error_type: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": {
                "message": message,
                "type": error_type
            }
        })),
    )
        .into_response()
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::InvalidPath(e) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string(), "invalid_path")
        }
        StoreError::NotFound(path) => error_response(
            StatusCode::NOT_FOUND,
            format!("Document not found: {}", path),
            "not_found",
        ),
        other => error_response(
            StatusCode::BAD_REQUEST,
            other.to_string(),
            "invalid_request_error",
        ),
    }
}

/// GET - Read a document or list a collection
async fn handle_get(State(store): State<Arc<DocumentStore>>, Path(path): Path<String>) -> Response {
    let parsed = match DocumentPath::parse(&path) {
        Ok(parsed) => parsed,
        Err(e) => return store_error_response(e.into()),
    };

    if parsed.is_document() {
        match store.get(&path) {
            Ok(Some(data)) => Json(serde_json::json!({
                "id": parsed.id(),
                "path": parsed.to_string(),
                "data": data,
            }))
            .into_response(),
            Ok(None) => store_error_response(StoreError::NotFound(parsed.to_string())),
            Err(e) => store_error_response(e),
        }
    } else {
        match store.list(&path) {
            Ok(documents) => {
                let documents: Vec<serde_json::Value> = documents
                    .into_iter()
                    .map(|(id, data)| serde_json::json!({ "id": id, "data": data }))
                    .collect();
                Json(serde_json::json!({
                    "path": parsed.to_string(),
                    "documents": documents,
                }))
                .into_response()
            }
            Err(e) => store_error_response(e),
        }
    }
}

/// PUT - Overwrite a document
async fn handle_put(
    State(store): State<Arc<DocumentStore>>,
    Path(path): Path<String>,
    Json(data): Json<Document>,
) -> Response {
    debug!(path = %path, "Setting document");
    match store.set(&path, data) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "path": path }))).into_response(),
        Err(e) => store_error_response(e),
    }
}

/// PATCH - Merge fields into a document
async fn handle_patch(
    State(store): State<Arc<DocumentStore>>,
    Path(path): Path<String>,
    Json(data): Json<Document>,
) -> Response {
    debug!(path = %path, "Merging document");
    match store.set_with(&path, data, SetOptions::merge()) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "path": path }))).into_response(),
        Err(e) => store_error_response(e),
    }
}

/// POST - Add a document to a collection under a push id
async fn handle_add(
    State(store): State<Arc<DocumentStore>>,
    Path(path): Path<String>,
    Json(data): Json<Document>,
) -> Response {
    let collection = match DocumentPath::collection(&path) {
        Ok(collection) => collection,
        Err(e) => return store_error_response(e.into()),
    };

    match store.add(&path, data) {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": id,
                "path": collection.child(&id).to_string(),
            })),
        )
            .into_response(),
        Err(e) => store_error_response(e),
    }
}

/// DELETE - Remove a document
async fn handle_delete(
    State(store): State<Arc<DocumentStore>>,
    Path(path): Path<String>,
) -> Response {
    match store.delete(&path) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => store_error_response(StoreError::NotFound(path)),
        Err(e) => store_error_response(e),
    }
}

/// GET /listen - Server-Sent Events stream of document changes
async fn handle_listen(
    State(store): State<Arc<DocumentStore>>,
    Query(query): Query<ListenQuery>,
) -> Response {
    let prefix = match query.prefix.as_deref().map(DocumentPath::parse).transpose() {
        Ok(prefix) => prefix,
        Err(e) => return store_error_response(e.into()),
    };

    change_stream(store, prefix).into_response()
}

fn change_stream(
    store: Arc<DocumentStore>,
    prefix: Option<DocumentPath>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = store.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if let Some(prefix) = &prefix
                        && !change.is_under(prefix)
                    {
                        continue;
                    }
                    match Event::default().event("change").json_data(&change) {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!(error = %e, "Failed to encode change event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change listener lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
