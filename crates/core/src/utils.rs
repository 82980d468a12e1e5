/// Generate a Stripe-style object id with the given prefix
///
/// # Arguments
/// * `prefix` - The object prefix (e.g., "cus", "pm", "pi", "seti", "cs_test")
///
/// # Returns
/// An id in the format `{prefix}_{24_char_uuid}`
///
/// # Example
/// ```
/// use storefront_core::utils::generate_stripe_id;
///
/// let customer_id = generate_stripe_id("cus");
/// assert!(customer_id.starts_with("cus_"));
/// ```
pub fn generate_stripe_id(prefix: &str) -> String {
    let uuid_str = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &uuid_str[..24])
}

/// Client secret for an intent, in the `{id}_secret_{random}` shape clients expect
pub fn generate_client_secret(intent_id: &str) -> String {
    let uuid_str = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_secret_{}", intent_id, &uuid_str[..24])
}

/// Current Unix time in seconds
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_stripe_id() {
        let customer_id = generate_stripe_id("cus");
        assert!(customer_id.starts_with("cus_"));
        assert_eq!(customer_id.len(), 4 + 24); // "cus_" + 24 chars

        let intent_id = generate_stripe_id("seti");
        assert!(intent_id.starts_with("seti_"));
        assert_eq!(intent_id.len(), 5 + 24);
    }

    #[test]
    fn test_generate_stripe_id_uniqueness() {
        let id1 = generate_stripe_id("test");
        let id2 = generate_stripe_id("test");
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_client_secret_embeds_intent_id() {
        let secret = generate_client_secret("seti_123");
        assert!(secret.starts_with("seti_123_secret_"));
    }
}
