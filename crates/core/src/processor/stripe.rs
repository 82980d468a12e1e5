//! Stripe REST client.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use storefront_types::CheckoutSession;
use tracing::debug;
use url::form_urlencoded;

use super::{
    CheckoutSessionParams, Customer, PaymentIntentParams, PaymentProcessor, ProcessorError,
    ProcessorObject, SetupIntent,
};

/// Default Stripe API base URL
pub const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Form-encoded request body
type FormParams = Vec<(String, String)>;

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Stripe processor talking to the REST API with a secret key
pub struct StripeProcessor {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeProcessor {
    /// Create a client for the live Stripe API
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self::with_base_url(STRIPE_API_BASE, secret_key)
    }

    /// Create a client for a Stripe-compatible API at `base_url`
    pub fn with_base_url(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    /// Whether the key targets test mode
    pub fn is_test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test_") || self.secret_key.starts_with("rk_test_")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(&self.secret_key)
    }

    fn post(&self, path: &str, params: &FormParams) -> RequestBuilder {
        self.http
            .post(self.url(path))
            .bearer_auth(&self.secret_key)
            .form(params)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.http.delete(self.url(path)).bearer_auth(&self.secret_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<ProcessorObject, ProcessorError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(parse_error(status, &body));
        }

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(object)) => Ok(object),
            Ok(_) => Err(ProcessorError::Decode(format!(
                "expected a JSON object, got: {}",
                body
            ))),
            Err(e) => Err(ProcessorError::Decode(format!("{}: {}", e, body))),
        }
    }
}

fn parse_error(status: StatusCode, body: &str) -> ProcessorError {
    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(parsed) => ProcessorError::Api {
            message: parsed
                .error
                .message
                .unwrap_or_else(|| format!("Stripe request failed with status {}", status)),
            kind: parsed.error.kind,
            code: parsed.error.code,
            status: status.as_u16(),
        },
        Err(_) => ProcessorError::Decode(format!("{}: {}", status, body)),
    }
}

/// Encode an object id as a single URL path segment
fn segment(id: &str) -> Result<String, ProcessorError> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(ProcessorError::invalid_request(
            "parameter_invalid_string",
            format!("Invalid object id: '{}'", id),
        ));
    }
    Ok(form_urlencoded::byte_serialize(id.as_bytes()).collect())
}

fn from_object<T: serde::de::DeserializeOwned>(object: ProcessorObject) -> Result<T, ProcessorError> {
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| ProcessorError::Decode(e.to_string()))
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Encode payment intent parameters
fn payment_intent_form(params: &PaymentIntentParams) -> FormParams {
    vec![
        param("amount", params.amount),
        param("currency", &params.currency),
        param("customer", &params.customer),
        param("payment_method", &params.payment_method),
        param("off_session", params.off_session),
        param("confirm", params.confirm),
        param("confirmation_method", params.confirmation_method.as_str()),
    ]
}

/// Encode checkout session parameters using Stripe's bracketed nesting
fn checkout_session_form(params: &CheckoutSessionParams) -> FormParams {
    let mut form = FormParams::new();

    for (index, method) in params.payment_method_types.iter().enumerate() {
        form.push(param(&format!("payment_method_types[{}]", index), method));
    }
    form.push(param("mode", &params.mode));
    form.push(param("success_url", &params.success_url));
    form.push(param("cancel_url", &params.cancel_url));

    for (index, item) in params.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", index);
        form.push(param(&format!("{}[quantity]", prefix), item.quantity));
        form.push(param(
            &format!("{}[price_data][currency]", prefix),
            &item.currency,
        ));
        form.push(param(
            &format!("{}[price_data][unit_amount]", prefix),
            item.unit_amount,
        ));
        form.push(param(
            &format!("{}[price_data][product_data][name]", prefix),
            &item.product_name,
        ));
    }

    if let Some(customer) = &params.customer {
        form.push(param("customer", customer));
    }
    if let Some(reference) = &params.client_reference_id {
        form.push(param("client_reference_id", reference));
    }

    form
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_customer(&self, email: Option<&str>) -> Result<Customer, ProcessorError> {
        let mut form = FormParams::new();
        if let Some(email) = email {
            form.push(param("email", email));
        }
        let object = self.send(self.post("/customers", &form)).await?;
        from_object(object)
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProcessorError> {
        let path = format!("/customers/{}", segment(customer_id)?);
        self.send(self.delete(&path)).await?;
        Ok(())
    }

    async fn create_setup_intent(&self, customer_id: &str) -> Result<SetupIntent, ProcessorError> {
        let form = vec![param("customer", customer_id)];
        let object = self.send(self.post("/setup_intents", &form)).await?;
        from_object(object)
    }

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let path = format!("/payment_methods/{}", segment(payment_method_id)?);
        self.send(self.get(&path)).await
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let path = format!("/payment_methods/{}/attach", segment(payment_method_id)?);
        let form = vec![param("customer", customer_id)];
        self.send(self.post(&path, &form)).await
    }

    async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
        idempotency_key: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        debug!(idempotency_key, amount = params.amount, "Creating payment intent");
        let request = self
            .post("/payment_intents", &payment_intent_form(params))
            .header("Idempotency-Key", idempotency_key);
        self.send(request).await
    }

    async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let path = format!("/payment_intents/{}/confirm", segment(payment_intent_id)?);
        self.send(self.post(&path, &FormParams::new())).await
    }

    async fn refund_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Option<i64>,
    ) -> Result<ProcessorObject, ProcessorError> {
        let mut form = vec![param("payment_intent", payment_intent_id)];
        if let Some(amount) = amount {
            form.push(param("amount", amount));
        }
        self.send(self.post("/refunds", &form)).await
    }

    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> Result<CheckoutSession, ProcessorError> {
        let object = self
            .send(self.post("/checkout/sessions", &checkout_session_form(params)))
            .await?;
        from_object(object)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header, method, path},
    };

    use super::*;
    use crate::processor::LineItem;

    async fn processor_for(server: &MockServer) -> StripeProcessor {
        StripeProcessor::with_base_url(format!("{}/v1", server.uri()), "sk_test_123")
    }

    #[test]
    fn test_test_mode_detection() {
        assert!(StripeProcessor::new("sk_test_abc").is_test_mode());
        assert!(!StripeProcessor::new("sk_live_abc").is_test_mode());
    }

    #[test]
    fn test_checkout_form_uses_bracketed_keys() {
        let form = checkout_session_form(&CheckoutSessionParams {
            payment_method_types: vec!["card".to_string()],
            mode: "payment".to_string(),
            success_url: "http://localhost:3000/auth/success".to_string(),
            cancel_url: "http://localhost:3000/auth/cancel".to_string(),
            line_items: vec![LineItem {
                quantity: 2,
                currency: "usd".to_string(),
                unit_amount: 10000,
                product_name: "New camera".to_string(),
            }],
            customer: None,
            client_reference_id: Some("u1".to_string()),
        });

        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("payment_method_types[0]"), Some("card"));
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("10000"));
        assert_eq!(
            get("line_items[0][price_data][product_data][name]"),
            Some("New camera")
        );
        assert_eq!(get("client_reference_id"), Some("u1"));
        assert_eq!(get("customer"), None);
    }

    #[tokio::test]
    async fn test_create_customer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(body_string_contains("email=jane%40example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_123",
                "object": "customer",
                "email": "jane@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let processor = processor_for(&server).await;
        let customer = processor
            .create_customer(Some("jane@example.com"))
            .await
            .unwrap();
        assert_eq!(customer.id, "cus_123");
        assert_eq!(customer.email.as_deref(), Some("jane@example.com"));
    }

    #[tokio::test]
    async fn test_payment_intent_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("idempotency-key", "push_abc"))
            .and(body_string_contains("confirmation_method=manual"))
            .and(body_string_contains("confirm=true"))
            .and(body_string_contains("off_session=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pi_123",
                "object": "payment_intent",
                "amount": 1500,
                "status": "succeeded"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let processor = processor_for(&server).await;
        let params = PaymentIntentParams::charge_now(1500, "usd", "cus_1", "pm_1");
        let intent = processor
            .create_payment_intent(&params, "push_abc")
            .await
            .unwrap();
        assert_eq!(intent.get("status"), Some(&json!("succeeded")));
    }

    #[tokio::test]
    async fn test_api_error_keeps_type_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents/pi_1/confirm"))
            .respond_with(ResponseTemplate::new(402).set_body_json(json!({
                "error": {
                    "type": "card_error",
                    "code": "card_declined",
                    "message": "Your card was declined."
                }
            })))
            .mount(&server)
            .await;

        let processor = processor_for(&server).await;
        let err = processor.confirm_payment_intent("pi_1").await.unwrap_err();
        assert_eq!(err.kind(), Some("card_error"));
        assert_eq!(err.code(), Some("card_declined"));
        assert_eq!(err.to_string(), "Your card was declined.");
    }

    #[tokio::test]
    async fn test_unparseable_error_has_no_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_methods/pm_1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let processor = processor_for(&server).await;
        let err = processor.retrieve_payment_method("pm_1").await.unwrap_err();
        assert!(matches!(err, ProcessorError::Decode(_)));
        assert_eq!(err.kind(), None);
    }

    #[tokio::test]
    async fn test_checkout_session_and_delete_customer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("mode=payment"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_1",
                "object": "checkout.session",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/customers/cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_1",
                "object": "customer",
                "deleted": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let processor = processor_for(&server).await;
        let session = processor
            .create_checkout_session(&CheckoutSessionParams {
                payment_method_types: vec!["card".to_string()],
                mode: "payment".to_string(),
                success_url: "http://localhost/success".to_string(),
                cancel_url: "http://localhost/cancel".to_string(),
                line_items: vec![],
                customer: None,
                client_reference_id: None,
            })
            .await
            .unwrap();
        assert_eq!(session.id, "cs_test_1");

        processor.delete_customer("cus_1").await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_payment_method() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_methods/pm_card_visa/attach"))
            .and(body_string_contains("customer=cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pm_123",
                "object": "payment_method",
                "customer": "cus_1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let processor = processor_for(&server).await;
        let method = processor
            .attach_payment_method("pm_card_visa", "cus_1")
            .await
            .unwrap();
        assert_eq!(method.get("customer"), Some(&json!("cus_1")));
    }

    #[test]
    fn test_ids_are_encoded_as_one_segment() {
        assert_eq!(segment("pm_1").unwrap(), "pm_1");
        assert_eq!(
            segment("../customers/cus_x").unwrap(),
            "..%2Fcustomers%2Fcus_x"
        );
        assert_eq!(segment("pi_1?expand=x").unwrap(), "pi_1%3Fexpand%3Dx");
        assert!(segment("..").is_err());
        assert!(segment("").is_err());
    }

    #[tokio::test]
    async fn test_payment_method_id_cannot_reach_other_resources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/customers/cus_victim"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cus_victim",
                "object": "customer",
                "email": "victim@example.com"
            })))
            .expect(0)
            .mount(&server)
            .await;

        let processor = processor_for(&server).await;
        let result = processor
            .retrieve_payment_method("../customers/cus_victim")
            .await;
        assert!(result.is_err());

        let err = processor.retrieve_payment_method("..").await.unwrap_err();
        assert_eq!(err.code(), Some("parameter_invalid_string"));
    }
}
