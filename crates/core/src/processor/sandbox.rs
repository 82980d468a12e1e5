//! In-memory processor with Stripe-shaped objects.
//!
//! Used by `storefront run --sandbox` and by the handler tests. Test cards
//! reproduce the outcomes the handlers have to cope with: an immediate
//! success, a decline, and a 3-D Secure challenge that needs a second
//! confirmation. Clients pick a card with the processor's test payment
//! method ids (`pm_card_visa`, `pm_card_chargeDeclined`,
//! `pm_card_threeDSecure2Required`); each use mints a fresh `pm_` method.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use storefront_types::{CheckoutSession, PaymentIntentStatus};
use tracing::debug;

use super::{
    CheckoutSessionParams, Customer, PaymentIntentParams, PaymentProcessor, ProcessorError,
    ProcessorObject, SetupIntent,
};
use crate::utils::{generate_client_secret, generate_stripe_id, now_timestamp};

/// Smallest chargeable amount in minor units
const MINIMUM_AMOUNT: i64 = 50;

/// Card behaviour of a sandbox payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCard {
    /// Charges succeed
    Visa,
    /// Charges are declined
    Declined,
    /// Charges require 3-D Secure authentication before confirmation
    AuthenticationRequired,
}

impl TestCard {
    /// Card behind a test payment method id
    pub fn from_payment_method_id(id: &str) -> Option<Self> {
        match id {
            "pm_card_visa" => Some(TestCard::Visa),
            "pm_card_chargeDeclined" | "pm_card_visa_chargeDeclined" => Some(TestCard::Declined),
            "pm_card_threeDSecure2Required" | "pm_card_authenticationRequired" => {
                Some(TestCard::AuthenticationRequired)
            }
            _ => None,
        }
    }

    fn last4(&self) -> &'static str {
        match self {
            TestCard::Visa => "4242",
            TestCard::Declined => "0002",
            TestCard::AuthenticationRequired => "3184",
        }
    }
}

#[derive(Debug, Clone)]
struct SandboxPaymentMethod {
    card: TestCard,
    object: ProcessorObject,
}

#[derive(Debug, Clone)]
struct SandboxIntent {
    card: TestCard,
    authenticated: bool,
    object: ProcessorObject,
}

/// Outcome of a payment intent creation, replayed for its idempotency key
#[derive(Debug, Clone)]
enum Recorded {
    Created(ProcessorObject),
    Failed {
        kind: String,
        code: Option<String>,
        message: String,
        status: u16,
    },
}

impl Recorded {
    fn failure(err: &ProcessorError) -> Option<Self> {
        match err {
            ProcessorError::Api {
                kind,
                code,
                message,
                status,
            } => Some(Recorded::Failed {
                kind: kind.clone(),
                code: code.clone(),
                message: message.clone(),
                status: *status,
            }),
            _ => None,
        }
    }

    fn replay(&self) -> Result<ProcessorObject, ProcessorError> {
        match self {
            Recorded::Created(object) => Ok(object.clone()),
            Recorded::Failed {
                kind,
                code,
                message,
                status,
            } => Err(ProcessorError::Api {
                kind: kind.clone(),
                code: code.clone(),
                message: message.clone(),
                status: *status,
            }),
        }
    }
}

#[derive(Default)]
struct SandboxState {
    customers: HashMap<String, ProcessorObject>,
    setup_intents: HashMap<String, ProcessorObject>,
    payment_methods: HashMap<String, SandboxPaymentMethod>,
    payment_intents: HashMap<String, SandboxIntent>,
    refunded: HashMap<String, i64>,
    idempotent_responses: HashMap<String, Recorded>,
    checkout_sessions: HashMap<String, ProcessorObject>,
}

impl SandboxState {
    /// Store a new card payment method, attached to `customer_id` when given
    fn mint_card(&mut self, customer_id: Option<&str>, card: TestCard) -> (String, ProcessorObject) {
        let id = generate_stripe_id("pm");
        let payment_method = object(json!({
            "id": id,
            "object": "payment_method",
            "type": "card",
            "created": now_timestamp(),
            "customer": customer_id,
            "card": {
                "brand": "visa",
                "last4": card.last4(),
                "exp_month": 12,
                "exp_year": 2034,
            },
        }));

        self.payment_methods.insert(
            id.clone(),
            SandboxPaymentMethod {
                card,
                object: payment_method.clone(),
            },
        );
        (id, payment_method)
    }
}

/// In-memory payment processor
#[derive(Default)]
pub struct SandboxProcessor {
    state: Mutex<SandboxState>,
}

fn object(value: serde_json::Value) -> ProcessorObject {
    match value {
        serde_json::Value::Object(map) => map,
        _ => ProcessorObject::new(),
    }
}

fn card_declined() -> ProcessorError {
    ProcessorError::Api {
        kind: "card_error".to_string(),
        code: Some("card_declined".to_string()),
        message: "Your card was declined.".to_string(),
        status: 402,
    }
}

fn set_status(object: &mut ProcessorObject, status: PaymentIntentStatus) {
    object.insert("status".to_string(), json!(status.as_str()));
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a card payment method attached to `customer_id`, returning its id
    pub fn attach_test_card(&self, customer_id: &str, card: TestCard) -> String {
        let (id, _) = self.state.lock().mint_card(Some(customer_id), card);
        id
    }

    /// Complete the 3-D Secure challenge of a payment intent, as the shopper's
    /// browser would, leaving it waiting for confirmation
    pub fn authenticate_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let mut state = self.state.lock();
        let intent = state
            .payment_intents
            .get_mut(payment_intent_id)
            .ok_or_else(|| ProcessorError::missing("payment_intent", payment_intent_id))?;

        if intent.object.get("status") != Some(&json!(PaymentIntentStatus::RequiresAction.as_str()))
        {
            return Err(ProcessorError::invalid_request(
                "payment_intent_unexpected_state",
                "This PaymentIntent does not require authentication.",
            ));
        }

        intent.authenticated = true;
        intent.object.remove("next_action");
        set_status(&mut intent.object, PaymentIntentStatus::RequiresConfirmation);
        Ok(intent.object.clone())
    }

    /// Look up a stored customer
    pub fn customer(&self, customer_id: &str) -> Option<ProcessorObject> {
        self.state.lock().customers.get(customer_id).cloned()
    }

    /// Look up a stored checkout session
    pub fn checkout_session(&self, session_id: &str) -> Option<ProcessorObject> {
        self.state.lock().checkout_sessions.get(session_id).cloned()
    }

    /// Number of payment intents created so far
    pub fn payment_intent_count(&self) -> usize {
        self.state.lock().payment_intents.len()
    }

    /// Number of checkout sessions created so far
    pub fn checkout_session_count(&self) -> usize {
        self.state.lock().checkout_sessions.len()
    }
}

/// Attempt the charge of a confirmed intent
fn settle(intent: &mut SandboxIntent) -> Result<(), ProcessorError> {
    match (intent.card, intent.authenticated) {
        (TestCard::Declined, _) => {
            intent.object.insert(
                "last_payment_error".to_string(),
                json!({ "type": "card_error", "code": "card_declined" }),
            );
            set_status(&mut intent.object, PaymentIntentStatus::RequiresPaymentMethod);
            Err(card_declined())
        }
        (TestCard::AuthenticationRequired, false) => {
            intent.object.insert(
                "next_action".to_string(),
                json!({ "type": "use_stripe_sdk", "use_stripe_sdk": { "type": "three_d_secure_redirect" } }),
            );
            set_status(&mut intent.object, PaymentIntentStatus::RequiresAction);
            Ok(())
        }
        _ => {
            intent
                .object
                .insert("latest_charge".to_string(), json!(generate_stripe_id("ch")));
            set_status(&mut intent.object, PaymentIntentStatus::Succeeded);
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn create_customer(&self, email: Option<&str>) -> Result<Customer, ProcessorError> {
        let id = generate_stripe_id("cus");
        let customer = object(json!({
            "id": id,
            "object": "customer",
            "email": email,
            "created": now_timestamp(),
        }));
        self.state.lock().customers.insert(id.clone(), customer);

        debug!(customer_id = %id, "Sandbox customer created");
        Ok(Customer {
            id,
            email: email.map(str::to_string),
        })
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProcessorError> {
        let mut state = self.state.lock();
        if state.customers.remove(customer_id).is_none() {
            return Err(ProcessorError::missing("customer", customer_id));
        }
        // Deleting a customer detaches its payment methods
        for method in state.payment_methods.values_mut() {
            if method.object.get("customer") == Some(&json!(customer_id)) {
                method
                    .object
                    .insert("customer".to_string(), serde_json::Value::Null);
            }
        }
        Ok(())
    }

    async fn create_setup_intent(&self, customer_id: &str) -> Result<SetupIntent, ProcessorError> {
        let mut state = self.state.lock();
        if !state.customers.contains_key(customer_id) {
            return Err(ProcessorError::missing("customer", customer_id));
        }

        let id = generate_stripe_id("seti");
        let client_secret = generate_client_secret(&id);
        state.setup_intents.insert(
            id.clone(),
            object(json!({
                "id": id,
                "object": "setup_intent",
                "customer": customer_id,
                "client_secret": client_secret,
                "status": "requires_payment_method",
            })),
        );

        Ok(SetupIntent {
            id,
            client_secret: Some(client_secret),
        })
    }

    async fn retrieve_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let mut state = self.state.lock();
        if let Some(card) = TestCard::from_payment_method_id(payment_method_id) {
            let (_, method) = state.mint_card(None, card);
            return Ok(method);
        }

        state
            .payment_methods
            .get(payment_method_id)
            .map(|method| method.object.clone())
            .ok_or_else(|| ProcessorError::missing("PaymentMethod", payment_method_id))
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let mut state = self.state.lock();
        if !state.customers.contains_key(customer_id) {
            return Err(ProcessorError::missing("customer", customer_id));
        }
        if let Some(card) = TestCard::from_payment_method_id(payment_method_id) {
            let (_, method) = state.mint_card(Some(customer_id), card);
            return Ok(method);
        }

        let method = state
            .payment_methods
            .get_mut(payment_method_id)
            .ok_or_else(|| ProcessorError::missing("PaymentMethod", payment_method_id))?;
        match method.object.get("customer").and_then(Value::as_str) {
            None => {
                method
                    .object
                    .insert("customer".to_string(), json!(customer_id));
            }
            Some(owner) if owner == customer_id => {}
            Some(_) => {
                return Err(ProcessorError::invalid_request(
                    "payment_method_unexpected_state",
                    "The payment method you provided has already been attached to a customer.",
                ));
            }
        }
        Ok(method.object.clone())
    }

    async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
        idempotency_key: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let mut state = self.state.lock();

        if let Some(previous) = state.idempotent_responses.get(idempotency_key) {
            debug!(idempotency_key, "Replaying idempotent payment intent response");
            return previous.replay();
        }

        if params.amount < MINIMUM_AMOUNT {
            return Err(ProcessorError::invalid_request(
                "amount_too_small",
                format!(
                    "Amount must be at least {} {}",
                    MINIMUM_AMOUNT, params.currency
                ),
            ));
        }
        if !state.customers.contains_key(&params.customer) {
            return Err(ProcessorError::missing("customer", &params.customer));
        }
        let (payment_method, card) = match TestCard::from_payment_method_id(&params.payment_method)
        {
            Some(card) => (state.mint_card(None, card).0, card),
            None => {
                let method = state
                    .payment_methods
                    .get(&params.payment_method)
                    .ok_or_else(|| {
                        ProcessorError::missing("PaymentMethod", &params.payment_method)
                    })?;
                if let Some(owner) = method.object.get("customer").and_then(Value::as_str)
                    && owner != params.customer
                {
                    return Err(ProcessorError::invalid_request(
                        "payment_method_not_attached",
                        format!(
                            "The PaymentMethod {} does not belong to the Customer you supplied {}.",
                            params.payment_method, params.customer
                        ),
                    ));
                }
                (params.payment_method.clone(), method.card)
            }
        };

        let id = generate_stripe_id("pi");
        let mut intent = SandboxIntent {
            card,
            authenticated: false,
            object: object(json!({
                "id": id,
                "object": "payment_intent",
                "amount": params.amount,
                "currency": params.currency,
                "customer": params.customer,
                "payment_method": payment_method,
                "confirmation_method": params.confirmation_method.as_str(),
                "client_secret": generate_client_secret(&id),
                "created": now_timestamp(),
                "status": PaymentIntentStatus::RequiresConfirmation.as_str(),
            })),
        };

        let outcome = if params.confirm {
            settle(&mut intent)
        } else {
            Ok(())
        };
        let response = intent.object.clone();
        state.payment_intents.insert(id, intent);

        let recorded = match &outcome {
            Ok(()) => Some(Recorded::Created(response.clone())),
            Err(err) => Recorded::failure(err),
        };
        if let Some(recorded) = recorded {
            state
                .idempotent_responses
                .insert(idempotency_key.to_string(), recorded);
        }
        outcome.map(|()| response)
    }

    async fn confirm_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<ProcessorObject, ProcessorError> {
        let mut state = self.state.lock();
        let intent = state
            .payment_intents
            .get_mut(payment_intent_id)
            .ok_or_else(|| ProcessorError::missing("payment_intent", payment_intent_id))?;

        if intent.object.get("status")
            != Some(&json!(PaymentIntentStatus::RequiresConfirmation.as_str()))
        {
            return Err(ProcessorError::invalid_request(
                "payment_intent_unexpected_state",
                "This PaymentIntent's status does not allow confirmation.",
            ));
        }

        settle(intent)?;
        Ok(intent.object.clone())
    }

    async fn refund_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Option<i64>,
    ) -> Result<ProcessorObject, ProcessorError> {
        let mut state = self.state.lock();
        let intent = state
            .payment_intents
            .get(payment_intent_id)
            .ok_or_else(|| ProcessorError::missing("payment_intent", payment_intent_id))?;

        if intent.object.get("status") != Some(&json!(PaymentIntentStatus::Succeeded.as_str())) {
            return Err(ProcessorError::invalid_request(
                "charge_not_refundable",
                "This PaymentIntent has not succeeded and cannot be refunded.",
            ));
        }

        let captured = intent
            .object
            .get("amount")
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        let already_refunded = state
            .refunded
            .get(payment_intent_id)
            .copied()
            .unwrap_or_default();
        let refundable = captured - already_refunded;
        let amount = amount.unwrap_or(refundable);

        if amount <= 0 || amount > refundable {
            return Err(ProcessorError::invalid_request(
                "amount_too_large",
                format!(
                    "Refund amount ({}) is greater than unrefunded amount on charge ({})",
                    amount, refundable
                ),
            ));
        }

        state
            .refunded
            .insert(payment_intent_id.to_string(), already_refunded + amount);

        Ok(object(json!({
            "id": generate_stripe_id("re"),
            "object": "refund",
            "amount": amount,
            "payment_intent": payment_intent_id,
            "status": "succeeded",
            "created": now_timestamp(),
        })))
    }

    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> Result<CheckoutSession, ProcessorError> {
        if params.line_items.is_empty() {
            return Err(ProcessorError::invalid_request(
                "parameter_missing",
                "Missing required param: line_items.",
            ));
        }

        let id = generate_stripe_id("cs_test");
        let url = format!("https://checkout.stripe.com/c/pay/{}", id);
        let amount_total = params.line_items.iter().fold(0i64, |total, item| {
            total.saturating_add(item.unit_amount.saturating_mul(item.quantity))
        });

        self.state.lock().checkout_sessions.insert(
            id.clone(),
            object(json!({
                "id": id,
                "object": "checkout.session",
                "mode": params.mode,
                "amount_total": amount_total,
                "customer": params.customer,
                "client_reference_id": params.client_reference_id,
                "success_url": params.success_url,
                "cancel_url": params.cancel_url,
                "url": url,
                "status": "open",
            })),
        );

        Ok(CheckoutSession { id, url: Some(url) })
    }
}
