use serde_json::{Map, Value};
use storefront_docstore::{Document, SetOptions};
use storefront_types::{
    CustomerRecord, PaymentIntentStatus, PaymentRequest, payment_status,
    paths::{customer_path, payment_path},
};
use tracing::{debug, info};

use super::{
    CONFIRM_STRIPE_PAYMENT, CREATE_STRIPE_PAYMENT, FunctionError, Functions,
    REFUND_STRIPE_PAYMENT,
};
use crate::auth::Session;
use crate::processor::{PaymentIntentParams, ProcessorObject};
use crate::reporting::user_context;

impl Functions {
    /// Turn a client-written payment document into a payment intent.
    ///
    /// The document's push id is the idempotency key, so a redelivered
    /// creation event cannot charge twice.
    pub async fn create_stripe_payment(
        &self,
        user_id: &str,
        push_id: &str,
        snapshot: &Document,
    ) -> Result<ProcessorObject, FunctionError> {
        let path = payment_path(user_id, push_id);
        match self.try_create_stripe_payment(user_id, push_id, &path, snapshot).await {
            Ok(intent) => Ok(intent),
            Err(err) => {
                self.fail_record(&path, user_id, CREATE_STRIPE_PAYMENT, &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn try_create_stripe_payment(
        &self,
        user_id: &str,
        push_id: &str,
        path: &str,
        snapshot: &Document,
    ) -> Result<ProcessorObject, FunctionError> {
        let request: PaymentRequest = serde_json::from_value(Value::Object(snapshot.clone()))
            .map_err(|e| FunctionError::malformed(path, e.to_string()))?;

        let customer = self
            .store
            .get_as::<CustomerRecord>(&customer_path(user_id))?
            .ok_or_else(|| FunctionError::MissingCustomer(user_id.to_string()))?;

        let params = PaymentIntentParams::charge_now(
            request.amount,
            &request.currency,
            &customer.customer_id,
            &request.payment_method,
        );
        let intent = self.processor.create_payment_intent(&params, push_id).await?;
        self.store.set(path, intent.clone())?;

        info!(
            user_id,
            push_id,
            amount = request.amount,
            status = ?payment_status(&intent),
            "Payment intent created"
        );
        Ok(intent)
    }

    /// Confirm a payment whose document is waiting for confirmation, i.e.
    /// after the shopper completed 3-D Secure.
    ///
    /// Returns `None` when the document is in any other state.
    pub async fn confirm_stripe_payment(
        &self,
        user_id: &str,
        push_id: &str,
        after: &Document,
    ) -> Result<Option<ProcessorObject>, FunctionError> {
        if payment_status(after) != Some(PaymentIntentStatus::RequiresConfirmation) {
            return Ok(None);
        }

        let path = payment_path(user_id, push_id);
        match self.try_confirm_stripe_payment(&path, after).await {
            Ok(intent) => Ok(Some(intent)),
            Err(err) => {
                self.fail_record(&path, user_id, CONFIRM_STRIPE_PAYMENT, &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn try_confirm_stripe_payment(
        &self,
        path: &str,
        after: &Document,
    ) -> Result<ProcessorObject, FunctionError> {
        let intent_id = after
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| FunctionError::malformed(path, "missing payment intent `id`"))?;

        let intent = self.processor.confirm_payment_intent(intent_id).await?;
        self.store.set(path, intent.clone())?;

        debug!(path, status = ?payment_status(&intent), "Payment intent confirmed");
        Ok(intent)
    }

    /// Refund a settled payment on behalf of an administrator; the refund
    /// object is merged into the payment document as `refund`
    pub async fn refund_stripe_payment(
        &self,
        session: &Session,
        user_id: &str,
        push_id: &str,
        amount: Option<i64>,
    ) -> Result<ProcessorObject, FunctionError> {
        if !session.is_admin() {
            return Err(FunctionError::PermissionDenied(
                "only administrators can refund payments".to_string(),
            ));
        }

        match self.try_refund_stripe_payment(user_id, push_id, amount).await {
            Ok(refund) => Ok(refund),
            Err(err) => {
                self.report(&err, REFUND_STRIPE_PAYMENT, user_context(user_id))
                    .await;
                Err(err)
            }
        }
    }

    async fn try_refund_stripe_payment(
        &self,
        user_id: &str,
        push_id: &str,
        amount: Option<i64>,
    ) -> Result<ProcessorObject, FunctionError> {
        let path = payment_path(user_id, push_id);
        let payment = self
            .store
            .get(&path)?
            .ok_or_else(|| FunctionError::NotFound(path.clone()))?;
        let intent_id = payment
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FunctionError::InvalidArgument(format!("payment {} has no payment intent", push_id))
            })?;

        let refund = self
            .processor
            .refund_payment_intent(intent_id, amount)
            .await?;

        let mut update = Map::new();
        update.insert("refund".to_string(), Value::Object(refund.clone()));
        self.store.set_with(&path, update, SetOptions::merge())?;

        info!(user_id, push_id, payment_intent = intent_id, "Payment refunded");
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storefront_types::{GENERIC_ERROR_MESSAGE, Role};

    use crate::functions::test_support::{Harness, harness, user};
    use crate::processor::TestCard;

    use super::*;

    async fn customer_with_card(h: &Harness, uid: &str, card: TestCard) -> String {
        let record = h.functions.create_stripe_customer(&user(uid)).await.unwrap();
        h.sandbox.attach_test_card(&record.customer_id, card)
    }

    fn payment_doc(payment_method: &str, amount: i64) -> Document {
        json!({ "amount": amount, "currency": "usd", "payment_method": payment_method })
            .as_object()
            .unwrap()
            .clone()
    }

    fn admin() -> Session {
        Session {
            uid: "admin".to_string(),
            role: Role::Admin,
        }
    }

    #[tokio::test]
    async fn test_payment_document_becomes_intent() {
        let h = harness();
        let pm = customer_with_card(&h, "u1", TestCard::Visa).await;
        let snapshot = payment_doc(&pm, 2500);

        h.functions
            .create_stripe_payment("u1", "p1", &snapshot)
            .await
            .unwrap();

        let doc = h.store.get(&payment_path("u1", "p1")).unwrap().unwrap();
        assert_eq!(doc["object"], "payment_intent");
        assert_eq!(doc["status"], "succeeded");
        assert_eq!(doc["amount"], 2500);
        assert_eq!(doc["confirmation_method"], "manual");
    }

    #[tokio::test]
    async fn test_redelivered_event_does_not_charge_twice() {
        let h = harness();
        let pm = customer_with_card(&h, "u1", TestCard::Visa).await;
        let snapshot = payment_doc(&pm, 2500);

        let first = h.functions.create_stripe_payment("u1", "p1", &snapshot).await.unwrap();
        let second = h.functions.create_stripe_payment("u1", "p1", &snapshot).await.unwrap();
        assert_eq!(first["id"], second["id"]);
        assert_eq!(h.sandbox.payment_intent_count(), 1);
    }

    #[tokio::test]
    async fn test_declined_card_message_is_recorded() {
        let h = harness();
        let pm = customer_with_card(&h, "u1", TestCard::Declined).await;
        let snapshot = payment_doc(&pm, 2500);
        h.store.set(&payment_path("u1", "p1"), snapshot.clone()).unwrap();

        let result = h.functions.create_stripe_payment("u1", "p1", &snapshot).await;
        assert!(result.is_err());

        let doc = h.store.get(&payment_path("u1", "p1")).unwrap().unwrap();
        assert_eq!(doc["amount"], 2500);
        assert_eq!(doc["error"], "Your card was declined.");

        let entries = h.sink.entries();
        assert_eq!(entries[0].function_name(), Some(CREATE_STRIPE_PAYMENT));
        assert_eq!(entries[0].json_payload.context["user"], "u1");
    }

    #[tokio::test]
    async fn test_missing_customer_record_is_sanitized() {
        let h = harness();
        let snapshot = payment_doc("pm_x", 2500);

        let result = h.functions.create_stripe_payment("u1", "p1", &snapshot).await;
        assert!(matches!(result, Err(FunctionError::MissingCustomer(_))));

        let doc = h.store.get(&payment_path("u1", "p1")).unwrap().unwrap();
        assert_eq!(doc["error"], GENERIC_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_confirm_only_acts_on_requires_confirmation() {
        let h = harness();
        let pm = customer_with_card(&h, "u1", TestCard::AuthenticationRequired).await;
        let intent = h
            .functions
            .create_stripe_payment("u1", "p1", &payment_doc(&pm, 2500))
            .await
            .unwrap();
        assert_eq!(intent["status"], "requires_action");

        let skipped = h
            .functions
            .confirm_stripe_payment("u1", "p1", &intent)
            .await
            .unwrap();
        assert!(skipped.is_none());

        let id = intent["id"].as_str().unwrap();
        let authenticated = h.sandbox.authenticate_payment_intent(id).unwrap();
        let confirmed = h
            .functions
            .confirm_stripe_payment("u1", "p1", &authenticated)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed["status"], "succeeded");

        let doc = h.store.get(&payment_path("u1", "p1")).unwrap().unwrap();
        assert_eq!(doc["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_failed_confirmation_is_recorded() {
        let h = harness();
        let path = payment_path("u1", "p1");
        let after = json!({ "id": "pi_unknown", "status": "requires_confirmation" })
            .as_object()
            .unwrap()
            .clone();
        h.store.set(&path, after.clone()).unwrap();

        let result = h.functions.confirm_stripe_payment("u1", "p1", &after).await;
        assert!(result.is_err());

        let doc = h.store.get(&path).unwrap().unwrap();
        assert_eq!(doc["status"], "requires_confirmation");
        assert_eq!(doc["error"], "No such payment_intent: 'pi_unknown'");
        assert_eq!(h.sink.entries()[0].function_name(), Some(CONFIRM_STRIPE_PAYMENT));
    }

    #[tokio::test]
    async fn test_refund_requires_admin() {
        let h = harness();
        let session = Session {
            uid: "u1".to_string(),
            role: Role::User,
        };
        let result = h.functions.refund_stripe_payment(&session, "u1", "p1", None).await;
        assert!(matches!(result, Err(FunctionError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_refund_merges_refund_object() {
        let h = harness();
        let pm = customer_with_card(&h, "u1", TestCard::Visa).await;
        h.functions
            .create_stripe_payment("u1", "p1", &payment_doc(&pm, 2500))
            .await
            .unwrap();

        let refund = h
            .functions
            .refund_stripe_payment(&admin(), "u1", "p1", Some(500))
            .await
            .unwrap();
        assert_eq!(refund["amount"], 500);

        let doc = h.store.get(&payment_path("u1", "p1")).unwrap().unwrap();
        assert_eq!(doc["status"], "succeeded");
        assert_eq!(doc["refund"]["amount"], 500);
    }

    #[tokio::test]
    async fn test_refund_of_unknown_payment() {
        let h = harness();
        let result = h
            .functions
            .refund_stripe_payment(&admin(), "u1", "nope", None)
            .await;
        assert!(matches!(result, Err(FunctionError::NotFound(_))));
        assert_eq!(h.sink.len(), 1);
    }
}
