//! Cart payloads accepted by the checkout callables.

use serde::{Deserialize, Serialize};

/// Largest amount a checkout may charge, in minor units
pub const MAX_AMOUNT: i64 = 99_999_999;

/// One basket entry as sent by the storefront
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Price in major currency units (e.g. dollars)
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

impl CartItem {
    /// Unit price in the currency's minor unit (e.g. cents), `None` when
    /// the price is not finite or exceeds [`MAX_AMOUNT`]
    pub fn unit_amount(&self) -> Option<i64> {
        let cents = (self.price * 100.0).round();
        (cents.is_finite() && cents.abs() <= MAX_AMOUNT as f64).then_some(cents as i64)
    }

    /// Unit amount times quantity, `None` on overflow
    pub fn line_amount(&self) -> Option<i64> {
        self.unit_amount()?.checked_mul(self.quantity)
    }
}

/// Payload of the checkout callables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub cart: Vec<CartItem>,
}

impl CheckoutRequest {
    /// Sum of all line totals in minor units, `None` on overflow
    pub fn total_amount(&self) -> Option<i64> {
        self.cart
            .iter()
            .try_fold(0i64, |total, item| total.checked_add(item.line_amount()?))
    }
}

/// Response of the checkout callables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
