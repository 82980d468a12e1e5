use serde_json::Map;
use storefront_types::{
    CheckoutRequest, CheckoutSession, CustomerRecord, checkout::MAX_AMOUNT, paths::customer_path,
};
use tracing::info;

use super::{
    CREATE_ANONYMOUS_STRIPE_CHECKOUT, CREATE_STRIPE_CHECKOUT_FOR_USER, FunctionError, Functions,
};
use crate::processor::{CheckoutSessionParams, LineItem};
use crate::reporting::user_context;

const CHECKOUT_MODE: &str = "payment";

impl Functions {
    /// Hosted checkout for a signed-in shopper
    pub async fn create_checkout_for_user(
        &self,
        uid: &str,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, FunctionError> {
        match self.try_create_checkout(Some(uid), request).await {
            Ok(session) => Ok(session),
            Err(err) => {
                self.report(&err, CREATE_STRIPE_CHECKOUT_FOR_USER, user_context(uid))
                    .await;
                Err(err)
            }
        }
    }

    /// Hosted checkout for a guest
    pub async fn create_anonymous_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, FunctionError> {
        match self.try_create_checkout(None, request).await {
            Ok(session) => Ok(session),
            Err(err) => {
                self.report(&err, CREATE_ANONYMOUS_STRIPE_CHECKOUT, Map::new())
                    .await;
                Err(err)
            }
        }
    }

    async fn try_create_checkout(
        &self,
        uid: Option<&str>,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, FunctionError> {
        let line_items = self.line_items(request)?;

        let customer = match uid {
            Some(uid) => self
                .store
                .get_as::<CustomerRecord>(&customer_path(uid))?
                .map(|record| record.customer_id),
            None => None,
        };

        let params = CheckoutSessionParams {
            payment_method_types: self.checkout.payment_method_types.clone(),
            mode: CHECKOUT_MODE.to_string(),
            success_url: self.checkout.success_url.clone(),
            cancel_url: self.checkout.cancel_url.clone(),
            line_items,
            customer,
            client_reference_id: uid.map(str::to_string),
        };
        let session = self.processor.create_checkout_session(&params).await?;

        info!(
            session_id = %session.id,
            uid = uid.unwrap_or("anonymous"),
            amount = request.total_amount().unwrap_or_default(),
            "Checkout session created"
        );
        Ok(session)
    }

    fn line_items(&self, request: &CheckoutRequest) -> Result<Vec<LineItem>, FunctionError> {
        if request.cart.is_empty() {
            return Err(FunctionError::InvalidArgument("cart is empty".to_string()));
        }

        let line_items = request
            .cart
            .iter()
            .map(|item| {
                if item.quantity < 1 {
                    return Err(FunctionError::InvalidArgument(format!(
                        "quantity of {} must be at least 1",
                        item.name
                    )));
                }
                let unit_amount = item
                    .unit_amount()
                    .filter(|amount| *amount > 0)
                    .ok_or_else(|| {
                        FunctionError::InvalidArgument(format!(
                            "price of {} must be positive and at most {}",
                            item.name, MAX_AMOUNT
                        ))
                    })?;
                Ok(LineItem {
                    quantity: item.quantity,
                    currency: self.checkout.currency.clone(),
                    unit_amount,
                    product_name: item.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        match request.total_amount() {
            Some(total) if total <= MAX_AMOUNT => Ok(line_items),
            _ => Err(FunctionError::InvalidArgument(format!(
                "cart total must not exceed {}",
                MAX_AMOUNT
            ))),
        }
    }
}
