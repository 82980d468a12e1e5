//! Payment processor clients.
//!
//! [`PaymentProcessor`] is the seam between the handlers and the processor
//! API. Objects the handlers store verbatim (payment methods, payment
//! intents, refunds) come back as raw JSON maps; the few fields the
//! handlers read themselves are typed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_types::CheckoutSession;

pub mod sandbox;
pub mod stripe;

pub use sandbox::{SandboxProcessor, TestCard};
pub use stripe::StripeProcessor;

/// A processor object as returned by the API
pub type ProcessorObject = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Typed error returned by the processor (card declined, invalid request, ...)
    #[error("{message}")]
    Api {
        /// Processor error type, e.g. `card_error` or `invalid_request_error`
        kind: String,
        code: Option<String>,
        message: String,
        status: u16,
    },
    #[error("Failed to reach payment processor: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Unexpected payment processor response: {0}")]
    Decode(String),
}

impl ProcessorError {
    /// Processor error type, when the processor supplied one
    pub fn kind(&self) -> Option<&str> {
        match self {
            ProcessorError::Api { kind, .. } => Some(kind.as_str()),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProcessorError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn invalid_request(code: &str, message: impl Into<String>) -> Self {
        ProcessorError::Api {
            kind: "invalid_request_error".to_string(),
            code: Some(code.to_string()),
            message: message.into(),
            status: 400,
        }
    }

    pub(crate) fn missing(object: &str, id: &str) -> Self {
        ProcessorError::Api {
            kind: "invalid_request_error".to_string(),
            code: Some("resource_missing".to_string()),
            message: format!("No such {}: '{}'", object, id),
            status: 404,
        }
    }
}

/// Customer fields the handlers read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Setup intent fields the handlers read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMethod {
    Automatic,
    Manual,
}

impl ConfirmationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationMethod::Automatic => "automatic",
            ConfirmationMethod::Manual => "manual",
        }
    }
}

/// Parameters of a payment intent creation
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentParams {
    pub amount: i64,
    pub currency: String,
    pub customer: String,
    pub payment_method: String,
    pub off_session: bool,
    pub confirm: bool,
    pub confirmation_method: ConfirmationMethod,
}

impl PaymentIntentParams {
    /// On-session charge confirmed immediately, with manual re-confirmation after 3-D Secure
    pub fn charge_now(amount: i64, currency: &str, customer: &str, payment_method: &str) -> Self {
        Self {
            amount,
            currency: currency.to_string(),
            customer: customer.to_string(),
            payment_method: payment_method.to_string(),
            off_session: false,
            confirm: true,
            confirmation_method: ConfirmationMethod::Manual,
        }
    }
}

/// One checkout line item with inline price data
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub quantity: i64,
    pub currency: String,
    /// Unit amount in the currency's minor unit
    pub unit_amount: i64,
    pub product_name: String,
}

/// Parameters of a checkout session creation
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionParams {
    pub payment_method_types: Vec<String>,
    pub mode: String,
    pub success_url: String,
    pub cancel_url: String,
    pub line_items: Vec<LineItem>,
    pub customer: Option<String>,
    pub client_reference_id: Option<String>,
}

/// Payment processor API used by the handlers
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Get processor name
    fn name(&self) -> &'static str;

    /// Create a customer
    async fn create_customer(&self, email: Option<&str>) -> Result<Customer, ProcessorError>;

    /// Delete a customer
    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProcessorError>;

    /// Create a setup intent so the customer can save a payment method
    async fn create_setup_intent(&self, customer_id: &str) -> Result<SetupIntent, ProcessorError>;

    /// Retrieve a payment method
    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<ProcessorObject, ProcessorError>;

    /// Attach a payment method to a customer, returning the attached method
    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<ProcessorObject, ProcessorError>;

    /// Create a payment intent; repeated calls with the same key return the same intent
    async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
        idempotency_key: &str,
    ) -> Result<ProcessorObject, ProcessorError>;

    /// Confirm a payment intent
    async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<ProcessorObject, ProcessorError>;

    /// Refund a payment intent, fully or partially
    async fn refund_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Option<i64>,
    ) -> Result<ProcessorObject, ProcessorError>;

    /// Create a hosted checkout session
    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> Result<CheckoutSession, ProcessorError>;
}
