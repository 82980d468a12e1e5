//! Payment handlers.
//!
//! Each handler reacts to one account or document event (or serves one
//! callable) and talks to the payment processor. Document-triggered
//! handlers never leave a failure unrecorded: the affected record gets a
//! sanitized `error` field and the full error goes to the reporter.

use std::sync::Arc;

use serde_json::{Map, Value};
use storefront_docstore::{DocumentStore, SetOptions, StoreError};
use storefront_types::GENERIC_ERROR_MESSAGE;
use tracing::warn;

use crate::config::CheckoutConfig;
use crate::processor::{PaymentProcessor, ProcessorError};
use crate::reporting::{ErrorReporter, user_context};

mod checkout;
mod customers;
mod payment_methods;
mod payments;

pub const CREATE_STRIPE_CUSTOMER: &str = "createStripeCustomer";
pub const ADD_PAYMENT_METHOD_DETAILS: &str = "addPaymentMethodDetails";
pub const CREATE_STRIPE_PAYMENT: &str = "createStripePayment";
pub const CONFIRM_STRIPE_PAYMENT: &str = "confirmStripePayment";
pub const REFUND_STRIPE_PAYMENT: &str = "refundStripePayment";
pub const CLEANUP_USER: &str = "cleanupUser";
pub const CREATE_STRIPE_CHECKOUT_FOR_USER: &str = "createStripeCheckoutForUser";
pub const CREATE_ANONYMOUS_STRIPE_CHECKOUT: &str = "createAnonymousStripeCheckout";

#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No processor customer recorded for user {0}")]
    MissingCustomer(String),
    #[error("Malformed document {path}: {reason}")]
    MalformedDocument { path: String, reason: String },
    #[error("Payment method {0} is not attached to a customer")]
    UnattachedPaymentMethod(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl FunctionError {
    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        FunctionError::MalformedDocument {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Message safe to show the shopper.
///
/// Processor errors that carry a type (card declined, invalid request, ...)
/// are shown as-is; everything else is replaced by a generic message.
pub fn user_facing_message(err: &FunctionError) -> String {
    match err {
        FunctionError::Processor(processor_err) if processor_err.kind().is_some() => {
            processor_err.to_string()
        }
        _ => GENERIC_ERROR_MESSAGE.to_string(),
    }
}

/// Handlers sharing one store, processor and reporter
pub struct Functions {
    store: Arc<DocumentStore>,
    processor: Arc<dyn PaymentProcessor>,
    reporter: ErrorReporter,
    checkout: CheckoutConfig,
}

impl Functions {
    pub fn new(
        store: Arc<DocumentStore>,
        processor: Arc<dyn PaymentProcessor>,
        reporter: ErrorReporter,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            processor,
            reporter,
            checkout,
        }
    }

    /// Forward an error to the reporter; a failing sink is only logged
    pub(crate) async fn report(
        &self,
        err: &FunctionError,
        function_name: &str,
        context: Map<String, Value>,
    ) {
        if let Err(report_err) = self.reporter.report(err, function_name, context).await {
            warn!(function = function_name, error = %report_err, "Failed to report error");
        }
    }

    /// Record a failure on the document that triggered `function_name`
    pub(crate) async fn fail_record(
        &self,
        path: &str,
        user_id: &str,
        function_name: &str,
        err: &FunctionError,
    ) {
        warn!(function = function_name, path, error = %err, "Handler failed");

        let mut data = Map::new();
        data.insert(
            "error".to_string(),
            Value::String(user_facing_message(err)),
        );
        if let Err(store_err) = self.store.set_with(path, data, SetOptions::merge()) {
            warn!(path, error = %store_err, "Failed to record error on document");
        }

        self.report(err, function_name, user_context(user_id)).await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use storefront_docstore::DocumentStore;
    use storefront_types::{Role, UserAccount};

    use super::Functions;
    use crate::config::CheckoutConfig;
    use crate::processor::SandboxProcessor;
    use crate::reporting::{ErrorReporter, MemorySink};

    pub struct Harness {
        pub store: Arc<DocumentStore>,
        pub sandbox: Arc<SandboxProcessor>,
        pub sink: Arc<MemorySink>,
        pub functions: Functions,
    }

    pub fn harness() -> Harness {
        let store = DocumentStore::new();
        let sandbox = Arc::new(SandboxProcessor::new());
        let sink = Arc::new(MemorySink::new());
        let functions = Functions::new(
            store.clone(),
            sandbox.clone(),
            ErrorReporter::new(sink.clone()),
            CheckoutConfig::default(),
        );
        Harness {
            store,
            sandbox,
            sink,
            functions,
        }
    }

    pub fn user(uid: &str) -> UserAccount {
        UserAccount::new(uid.to_string(), Some(format!("{}@example.com", uid)), Role::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_processor_errors_are_shown() {
        let err = FunctionError::Processor(ProcessorError::Api {
            kind: "card_error".to_string(),
            code: Some("card_declined".to_string()),
            message: "Your card was declined.".to_string(),
            status: 402,
        });
        assert_eq!(user_facing_message(&err), "Your card was declined.");
    }

    #[test]
    fn test_untyped_errors_are_sanitized() {
        let decode = FunctionError::Processor(ProcessorError::Decode("<html>".to_string()));
        assert_eq!(user_facing_message(&decode), GENERIC_ERROR_MESSAGE);

        let missing = FunctionError::MissingCustomer("u1".to_string());
        assert_eq!(user_facing_message(&missing), GENERIC_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_fail_record_merges_error_and_reports() {
        let h = test_support::harness();
        let path = "stripe_customers/u1/payments/p1";
        h.store
            .set(path, serde_json::json!({ "amount": 100 }).as_object().unwrap().clone())
            .unwrap();

        let err = FunctionError::MissingCustomer("u1".to_string());
        h.functions
            .fail_record(path, "u1", CREATE_STRIPE_PAYMENT, &err)
            .await;

        let doc = h.store.get(path).unwrap().unwrap();
        assert_eq!(doc["amount"], 100);
        assert_eq!(doc["error"], GENERIC_ERROR_MESSAGE);

        let entries = h.sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function_name(), Some(CREATE_STRIPE_PAYMENT));
        assert_eq!(entries[0].json_payload.context["user"], "u1");
        assert!(entries[0].json_payload.message.contains("u1"));
    }
}
