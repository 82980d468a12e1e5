use storefront_types::{
    CustomerRecord, UserAccount,
    paths::{customer_path, payment_methods_path, payments_path},
};
use tracing::{debug, info};

use super::{CLEANUP_USER, CREATE_STRIPE_CUSTOMER, FunctionError, Functions};
use crate::reporting::user_context;

impl Functions {
    /// Create a processor customer and setup intent for a new account
    pub async fn create_stripe_customer(
        &self,
        user: &UserAccount,
    ) -> Result<CustomerRecord, FunctionError> {
        match self.try_create_stripe_customer(user).await {
            Ok(record) => Ok(record),
            Err(err) => {
                self.report(&err, CREATE_STRIPE_CUSTOMER, user_context(&user.uid))
                    .await;
                Err(err)
            }
        }
    }

    async fn try_create_stripe_customer(
        &self,
        user: &UserAccount,
    ) -> Result<CustomerRecord, FunctionError> {
        let customer = self.processor.create_customer(user.email.as_deref()).await?;
        let intent = self.processor.create_setup_intent(&customer.id).await?;

        let record = CustomerRecord {
            customer_id: customer.id,
            setup_secret: intent.client_secret,
        };
        self.store.set_from(&customer_path(&user.uid), &record)?;

        info!(uid = %user.uid, customer_id = %record.customer_id, "Processor customer created");
        Ok(record)
    }

    /// Remove a deleted account's processor customer and payment records.
    ///
    /// Returns the number of documents deleted.
    pub async fn cleanup_user(&self, user: &UserAccount) -> Result<usize, FunctionError> {
        match self.try_cleanup_user(user).await {
            Ok(deleted) => Ok(deleted),
            Err(err) => {
                self.report(&err, CLEANUP_USER, user_context(&user.uid)).await;
                Err(err)
            }
        }
    }

    async fn try_cleanup_user(&self, user: &UserAccount) -> Result<usize, FunctionError> {
        let record_path = customer_path(&user.uid);

        match self.store.get_as::<CustomerRecord>(&record_path)? {
            Some(record) => {
                self.processor.delete_customer(&record.customer_id).await?;
                debug!(customer_id = %record.customer_id, "Processor customer deleted");
            }
            None => debug!(uid = %user.uid, "No processor customer to delete"),
        }

        let mut batch = self.store.batch();
        for collection in [payment_methods_path(&user.uid), payments_path(&user.uid)] {
            for (id, _) in self.store.list(&collection)? {
                batch.delete(&format!("{}/{}", collection, id))?;
            }
        }
        let mut deleted = self.store.commit(batch);

        if self.store.delete(&record_path)? {
            deleted += 1;
        }

        info!(uid = %user.uid, deleted, "User payment data cleaned up");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use storefront_types::paths::{payment_method_path, payment_path};

    use crate::functions::test_support::{harness, user};
    use crate::processor::PaymentProcessor;

    use super::*;

    #[tokio::test]
    async fn test_create_customer_writes_record() {
        let h = harness();
        let record = h.functions.create_stripe_customer(&user("u1")).await.unwrap();

        assert!(record.customer_id.starts_with("cus_"));
        assert!(record.setup_secret.as_deref().unwrap().starts_with("seti_"));

        let stored: CustomerRecord = h.store.get_as(&customer_path("u1")).unwrap().unwrap();
        assert_eq!(stored, record);

        let customer = h.sandbox.customer(&record.customer_id).unwrap();
        assert_eq!(customer["email"], "u1@example.com");
    }

    #[tokio::test]
    async fn test_cleanup_removes_customer_and_records() {
        let h = harness();
        let u = user("u1");
        let record = h.functions.create_stripe_customer(&u).await.unwrap();

        let data = json!({ "id": "pm_1" }).as_object().unwrap().clone();
        h.store.set(&payment_method_path("u1", "a"), data.clone()).unwrap();
        h.store.set(&payment_method_path("u1", "b"), data.clone()).unwrap();
        h.store.set(&payment_path("u1", "c"), data.clone()).unwrap();
        // Another user's records stay
        h.store.set(&payment_path("u2", "c"), data).unwrap();

        let deleted = h.functions.cleanup_user(&u).await.unwrap();
        assert_eq!(deleted, 4);

        assert!(h.sandbox.customer(&record.customer_id).is_none());
        assert!(!h.store.exists(&customer_path("u1")).unwrap());
        assert!(h.store.list(&payment_methods_path("u1")).unwrap().is_empty());
        assert!(h.store.list(&payments_path("u1")).unwrap().is_empty());
        assert!(h.store.exists(&payment_path("u2", "c")).unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_without_customer_record_still_clears_records() {
        let h = harness();
        let data = json!({ "amount": 100 }).as_object().unwrap().clone();
        h.store.set(&payment_path("u1", "p"), data).unwrap();

        let deleted = h.functions.cleanup_user(&user("u1")).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(h.sink.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_reported() {
        let h = harness();
        let u = user("u1");
        let record = h.functions.create_stripe_customer(&u).await.unwrap();
        h.sandbox.delete_customer(&record.customer_id).await.unwrap();

        let result = h.functions.cleanup_user(&u).await;
        assert!(matches!(result, Err(FunctionError::Processor(_))));

        let entries = h.sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function_name(), Some(CLEANUP_USER));
        // Nothing was deleted locally
        assert!(h.store.exists(&customer_path("u1")).unwrap());
    }
}
