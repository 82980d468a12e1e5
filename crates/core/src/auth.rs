//! User accounts and session tokens.
//!
//! Account creation and deletion are published as [`AuthEvent`]s, which the
//! trigger dispatcher turns into processor customer setup and cleanup.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use storefront_docstore::{DocumentStore, StoreError};
use storefront_types::{Role, UserAccount, paths::user_path};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::AuthConfig;

const AUTH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User {0} not found")]
    UserNotFound(String),
    #[error("Invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Account lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    UserCreated(UserAccount),
    UserDeleted(UserAccount),
}

/// Session token claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Verified caller identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub uid: String,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub struct AuthService {
    store: Arc<DocumentStore>,
    events_tx: broadcast::Sender<AuthEvent>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl_hours: u64,
    issuer: String,
}

impl AuthService {
    pub fn new(store: Arc<DocumentStore>, config: &AuthConfig) -> Self {
        let (events_tx, _) = broadcast::channel(AUTH_CHANNEL_CAPACITY);
        let secret = config.token_secret.as_bytes();
        Self {
            store,
            events_tx,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_ttl_hours: config.token_ttl_hours,
            issuer: config.issuer.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events_tx.subscribe()
    }

    /// Create an account under a fresh uid and return it with a session token
    pub fn create_user(
        &self,
        email: Option<String>,
        role: Role,
    ) -> Result<(UserAccount, String), AuthError> {
        let uid = self.store.push_id();
        let account = UserAccount::new(uid, email, role);
        self.store.set_from(&user_path(&account.uid), &account)?;
        let token = self.issue_token(&account)?;

        info!(uid = %account.uid, role = ?account.role, "User created");
        // No receivers just means no dispatcher is running
        let _ = self.events_tx.send(AuthEvent::UserCreated(account.clone()));
        Ok((account, token))
    }

    /// Delete an account, returning it
    pub fn delete_user(&self, uid: &str) -> Result<UserAccount, AuthError> {
        let account = self.get_user(uid)?;
        self.store.delete(&user_path(uid))?;

        info!(uid, "User deleted");
        let _ = self.events_tx.send(AuthEvent::UserDeleted(account.clone()));
        Ok(account)
    }

    pub fn get_user(&self, uid: &str) -> Result<UserAccount, AuthError> {
        self.store
            .get_as::<UserAccount>(&user_path(uid))?
            .ok_or_else(|| AuthError::UserNotFound(uid.to_string()))
    }

    pub fn issue_token(&self, account: &UserAccount) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: account.uid.clone(),
            role: account.role,
            iat: now,
            exp: now + (self.token_ttl_hours as i64) * 3600,
            iss: self.issuer.clone(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Session, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)?;

        debug!(uid = %data.claims.sub, "Session token verified");
        Ok(Session {
            uid: data.claims.sub,
            role: data.claims.role,
        })
    }
}
