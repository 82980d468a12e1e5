//! Shared data model for the storefront backend.
//!
//! Documents in the store are plain JSON objects; the types here describe
//! the shapes the payment handlers read and write, the document paths they
//! live under, and the cart payloads the checkout callables accept.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod checkout;
pub mod paths;

pub use checkout::{CartItem, CheckoutRequest, CheckoutSession};
pub use paths::{DocumentPath, PathError, TriggerPath};

/// Name of the configuration manifest loaded by the CLI
pub const MANIFEST_FILE_NAME: &str = "storefront.yaml";

/// Message written to records when an error carries no processor-specific type
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred, developers have been alerted";

/// Collection names used by the payment handlers
pub mod collections {
    pub const STRIPE_CUSTOMERS: &str = "stripe_customers";
    pub const PAYMENT_METHODS: &str = "payment_methods";
    pub const PAYMENTS: &str = "payments";
    pub const USERS: &str = "users";
    pub const PRODUCTS: &str = "products";
}

/// Processor customer stored at `stripe_customers/{userId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    /// Processor customer id (e.g. `cus_...`)
    pub customer_id: String,

    /// Client secret of the latest setup intent, used by the client to save a card
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_secret: Option<String>,
}

/// Payment method document as first written by the client.
///
/// The handler replaces it with the full processor object once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodRecord {
    /// Processor payment method id, or a test id such as `pm_card_visa`
    pub id: String,
}

/// Payment document as first written by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Amount in the currency's minor unit
    pub amount: i64,
    pub currency: String,
    /// Processor payment method id to charge
    pub payment_method: String,
}

/// Lifecycle of a payment intent as reported by the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

impl PaymentIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentIntentStatus::RequiresConfirmation => "requires_confirmation",
            PaymentIntentStatus::RequiresAction => "requires_action",
            PaymentIntentStatus::Processing => "processing",
            PaymentIntentStatus::RequiresCapture => "requires_capture",
            PaymentIntentStatus::Canceled => "canceled",
            PaymentIntentStatus::Succeeded => "succeeded",
        }
    }
}

/// Read the `status` of a payment document, if it holds a payment intent
pub fn payment_status(document: &serde_json::Map<String, JsonValue>) -> Option<PaymentIntentStatus> {
    document
        .get("status")
        .cloned()
        .and_then(|status| serde_json::from_value(status).ok())
}

/// Account role, as stored on `users/{userId}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// User account stored at `users/{userId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(uid: String, email: Option<String>, role: Role) -> Self {
        Self {
            uid,
            email,
            role,
            created_at: Utc::now(),
        }
    }
}

/// Storefront product stored at `products/{productId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Price in major currency units, as shown in the storefront
    pub price: f64,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub is_recommended: bool,
    /// Remaining storefront fields (images, brand, sizes, ...)
    #[serde(flatten)]
    pub extra: IndexMap<String, JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_record_skips_missing_secret() {
        let record = CustomerRecord {
            customer_id: "cus_123".to_string(),
            setup_secret: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, serde_json::json!({ "customer_id": "cus_123" }));
    }

    #[test]
    fn test_payment_status_reads_intent_status() {
        let doc = serde_json::json!({ "id": "pi_1", "status": "requires_confirmation" });
        let status = payment_status(doc.as_object().unwrap());
        assert_eq!(status, Some(PaymentIntentStatus::RequiresConfirmation));

        let pending = serde_json::json!({ "amount": 100, "currency": "usd" });
        assert_eq!(payment_status(pending.as_object().unwrap()), None);

        let unknown = serde_json::json!({ "status": "something_new" });
        assert_eq!(payment_status(unknown.as_object().unwrap()), None);
    }

    #[test]
    fn test_role_serializes_uppercase() {
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), "ADMIN");
        let role: Role = serde_json::from_value(serde_json::json!("USER")).unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_product_keeps_extra_fields() {
        let product: Product = serde_json::from_value(serde_json::json!({
            "name": "Camera",
            "price": 100.0,
            "isFeatured": true,
            "brand": "Leica"
        }))
        .unwrap();
        assert!(product.is_featured);
        assert!(!product.is_recommended);
        assert_eq!(product.extra.get("brand"), Some(&serde_json::json!("Leica")));
    }
}
