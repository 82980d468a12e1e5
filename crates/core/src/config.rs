//! Runtime settings shared by the handlers and the API.

use serde::{Deserialize, Serialize};

/// Top-level settings consumed by [`crate::Storefront`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorefrontConfig {
    #[serde(default)]
    pub checkout: CheckoutConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Checkout session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Where the processor sends the shopper after paying
    #[serde(default = "default_success_url")]
    pub success_url: String,

    /// Where the processor sends the shopper after abandoning checkout
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,

    /// Three-letter ISO currency code used for cart line items
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_payment_method_types")]
    pub payment_method_types: Vec<String>,
}

fn default_success_url() -> String {
    "http://localhost:3000/auth/success".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/auth/cancel".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_payment_method_types() -> Vec<String> {
    vec!["card".to_string()]
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            success_url: default_success_url(),
            cancel_url: default_cancel_url(),
            currency: default_currency(),
            payment_method_types: default_payment_method_types(),
        }
    }
}

/// Session token settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign session tokens
    #[serde(default)]
    pub token_secret: String,

    /// Session lifetime in hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,

    /// Issuer claim written into session tokens
    #[serde(default = "default_issuer")]
    pub issuer: String,
}

fn default_token_ttl_hours() -> u64 {
    24
}

fn default_issuer() -> String {
    "storefront".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            token_ttl_hours: default_token_ttl_hours(),
            issuer: default_issuer(),
        }
    }
}
