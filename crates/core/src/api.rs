//! HTTP API.
//!
//! Callables follow the `{ "data": ... }` request / `{ "result": ... }`
//! response envelope; failures come back as
//! `{ "error": { "status": "INVALID_ARGUMENT", "message": "..." } }`.
//! The document store is mounted under `/db`.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use storefront_types::{CheckoutRequest, Role};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::{
    Storefront,
    auth::{AuthError, Session},
    catalog,
    functions::{FunctionError, user_facing_message},
};

pub type AppState = Storefront;

/// Error returned by every endpoint
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message)
    }

    fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "PERMISSION_DENIED", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": {
                    "status": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

impl From<FunctionError> for ApiError {
    fn from(err: FunctionError) -> Self {
        match &err {
            FunctionError::InvalidArgument(message) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message.clone())
            }
            FunctionError::PermissionDenied(message) => Self::permission_denied(message.clone()),
            FunctionError::NotFound(message) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message.clone())
            }
            FunctionError::Processor(processor_err) if processor_err.kind().is_some() => Self::new(
                StatusCode::BAD_REQUEST,
                "FAILED_PRECONDITION",
                user_facing_message(&err),
            ),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                user_facing_message(&err),
            ),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UserNotFound(uid) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("User {} not found", uid))
            }
            AuthError::InvalidToken(_) => Self::unauthenticated(err.to_string()),
            AuthError::Store(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                err.to_string(),
            ),
        }
    }
}

/// Session from an `Authorization: Bearer` header, if one was sent
fn session(state: &AppState, headers: &HeaderMap) -> Result<Option<Session>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthenticated("Malformed Authorization header"))?;
    Ok(Some(state.auth.verify_token(token.trim())?))
}

fn require_session(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiError> {
    session(state, headers)?
        .ok_or_else(|| ApiError::unauthenticated("The function must be called while authenticated"))
}

#[derive(Debug, Deserialize)]
pub struct CallableRequest<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct CallableResponse<T> {
    pub result: T,
}

fn callable<T: Serialize>(result: T) -> Json<CallableResponse<T>> {
    Json(CallableResponse { result })
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /functions/createStripeCheckoutForUser
async fn checkout_for_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CallableRequest<CheckoutRequest>>,
) -> Result<Response, ApiError> {
    let session = require_session(&state, &headers)?;
    let checkout = state
        .functions
        .create_checkout_for_user(&session.uid, &request.data)
        .await?;
    Ok(callable(checkout).into_response())
}

/// POST /functions/createAnonymousStripeCheckout
async fn anonymous_checkout(
    State(state): State<AppState>,
    Json(request): Json<CallableRequest<CheckoutRequest>>,
) -> Result<Response, ApiError> {
    let checkout = state
        .functions
        .create_anonymous_checkout(&request.data)
        .await?;
    Ok(callable(checkout).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub user_id: String,
    pub payment_id: String,
    #[serde(default)]
    pub amount: Option<i64>,
}

/// POST /functions/refundStripePayment
async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CallableRequest<RefundRequest>>,
) -> Result<Response, ApiError> {
    let session = require_session(&state, &headers)?;
    let RefundRequest {
        user_id,
        payment_id,
        amount,
    } = request.data;
    let refund = state
        .functions
        .refund_stripe_payment(&session, &user_id, &payment_id, amount)
        .await?;
    Ok(callable(refund).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
}

/// POST /auth/users - Create an account
async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateUserRequest>,
) -> Result<Response, ApiError> {
    if request.role == Role::Admin {
        let caller = require_session(&state, &headers)?;
        if !caller.is_admin() {
            return Err(ApiError::permission_denied(
                "Only administrators can create administrators",
            ));
        }
    }

    let (account, token) = state.auth.create_user(request.email, request.role)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "uid": account.uid,
            "role": account.role,
            "token": token,
        })),
    )
        .into_response())
}

/// DELETE /auth/users/{uid} - Delete an account (self or admin)
async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(uid): Path<String>,
) -> Result<Response, ApiError> {
    let caller = require_session(&state, &headers)?;
    if caller.uid != uid && !caller.is_admin() {
        return Err(ApiError::permission_denied("Cannot delete another user"));
    }

    state.auth.delete_user(&uid)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub path: String,
}

/// GET /routes/resolve?path=
async fn resolve_route(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResolveQuery>,
) -> Result<Response, ApiError> {
    let session = session(&state, &headers)?;
    let decision = state.routes.resolve(&query.path, session.as_ref());
    Ok(Json(decision).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ShelfQuery {
    pub limit: Option<usize>,
}

fn shelf_response(
    products: Result<Vec<storefront_types::Product>, catalog::CatalogError>,
) -> Result<Response, ApiError> {
    match products {
        Ok(products) => Ok(Json(serde_json::json!({ "products": products })).into_response()),
        Err(err) => {
            warn!(error = ?err, "Catalog query failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                err.to_string(),
            ))
        }
    }
}

/// GET /catalog/featured?limit=
async fn featured(
    State(state): State<AppState>,
    Query(query): Query<ShelfQuery>,
) -> Result<Response, ApiError> {
    shelf_response(catalog::featured_products(&state.store, query.limit))
}

/// GET /catalog/recommended?limit=
async fn recommended(
    State(state): State<AppState>,
    Query(query): Query<ShelfQuery>,
) -> Result<Response, ApiError> {
    shelf_response(catalog::recommended_products(&state.store, query.limit))
}

/// Create the API router, with the document store nested under `/db`
pub fn create_router(state: AppState) -> Router<()> {
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let store_router = storefront_docstore::create_router(state.store.clone());

    Router::new()
        .route("/health", get(health))
        .route(
            "/functions/createStripeCheckoutForUser",
            post(checkout_for_user),
        )
        .route(
            "/functions/createAnonymousStripeCheckout",
            post(anonymous_checkout),
        )
        .route("/functions/refundStripePayment", post(refund_payment))
        .route("/auth/users", post(create_user))
        .route("/auth/users/{uid}", delete(delete_user))
        .route("/routes/resolve", get(resolve_route))
        .route("/catalog/featured", get(featured))
        .route("/catalog/recommended", get(recommended))
        .with_state(state)
        .nest("/db", store_router)
        .layer(cors_layer)
}

/// Start the API server on the specified host and port
pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    info!("Starting storefront API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
