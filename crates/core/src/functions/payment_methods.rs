use serde_json::{Map, Value};
use storefront_docstore::{Document, SetOptions};
use storefront_types::{
    CustomerRecord, PaymentMethodRecord,
    paths::{customer_path, payment_method_path},
};
use tracing::info;

use super::{ADD_PAYMENT_METHOD_DETAILS, FunctionError, Functions};
use crate::processor::ProcessorObject;

impl Functions {
    /// Replace a client-written payment method document with the processor's
    /// object and refresh the customer's setup secret.
    ///
    /// A method that is not attached to a customer yet is attached to the
    /// user's processor customer first.
    pub async fn add_payment_method_details(
        &self,
        user_id: &str,
        push_id: &str,
        snapshot: &Document,
    ) -> Result<ProcessorObject, FunctionError> {
        let path = payment_method_path(user_id, push_id);
        match self.try_add_payment_method_details(user_id, &path, snapshot).await {
            Ok(method) => Ok(method),
            Err(err) => {
                self.fail_record(&path, user_id, ADD_PAYMENT_METHOD_DETAILS, &err)
                    .await;
                Err(err)
            }
        }
    }

    async fn try_add_payment_method_details(
        &self,
        user_id: &str,
        path: &str,
        snapshot: &Document,
    ) -> Result<ProcessorObject, FunctionError> {
        let record: PaymentMethodRecord = serde_json::from_value(Value::Object(snapshot.clone()))
            .map_err(|e| FunctionError::malformed(path, e.to_string()))?;
        let payment_method_id = record.id.as_str();

        let mut method = self
            .processor
            .retrieve_payment_method(payment_method_id)
            .await?;
        if method.get("customer").and_then(Value::as_str).is_none() {
            let customer = self
                .store
                .get_as::<CustomerRecord>(&customer_path(user_id))?
                .ok_or_else(|| FunctionError::MissingCustomer(user_id.to_string()))?;
            let retrieved_id = method
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(payment_method_id)
                .to_string();
            method = self
                .processor
                .attach_payment_method(&retrieved_id, &customer.customer_id)
                .await?;
        }
        self.store.set(path, method.clone())?;

        let customer_id = method
            .get("customer")
            .and_then(Value::as_str)
            .ok_or_else(|| FunctionError::UnattachedPaymentMethod(payment_method_id.to_string()))?;

        let intent = self.processor.create_setup_intent(customer_id).await?;
        let mut update = Map::new();
        update.insert(
            "setup_secret".to_string(),
            intent.client_secret.map(Value::String).unwrap_or(Value::Null),
        );
        self.store
            .set_with(&customer_path(user_id), update, SetOptions::merge())?;

        info!(user_id, payment_method = payment_method_id, "Payment method details stored");
        Ok(method)
    }
}
