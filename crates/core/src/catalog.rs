//! Product queries backing the featured and recommended shelves.

use storefront_docstore::{DocumentStore, StoreError};
use storefront_types::{Product, collections::PRODUCTS};
use tracing::warn;

/// Shelf size used when the caller gives none
pub const DEFAULT_SHELF_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to fetch featured products")]
    Featured(#[source] StoreError),
    #[error("Failed to fetch recommended products")]
    Recommended(#[source] StoreError),
}

pub fn featured_products(
    store: &DocumentStore,
    limit: Option<usize>,
) -> Result<Vec<Product>, CatalogError> {
    flagged_products(store, "isFeatured", limit).map_err(CatalogError::Featured)
}

pub fn recommended_products(
    store: &DocumentStore,
    limit: Option<usize>,
) -> Result<Vec<Product>, CatalogError> {
    flagged_products(store, "isRecommended", limit).map_err(CatalogError::Recommended)
}

fn flagged_products(
    store: &DocumentStore,
    flag: &str,
    limit: Option<usize>,
) -> Result<Vec<Product>, StoreError> {
    let limit = limit.unwrap_or(DEFAULT_SHELF_SIZE);
    let documents = store.where_eq(PRODUCTS, flag, &serde_json::Value::Bool(true), Some(limit))?;

    let mut products = Vec::with_capacity(documents.len());
    for (id, document) in documents {
        match serde_json::from_value::<Product>(serde_json::Value::Object(document)) {
            Ok(mut product) => {
                product.id = id;
                products.push(product);
            }
            Err(source) => {
                return Err(StoreError::Conversion {
                    path: format!("{}/{}", PRODUCTS, id),
                    source,
                });
            }
        }
    }
    if products.is_empty() {
        warn!(flag, "No products flagged");
    }
    Ok(products)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn seed(store: &DocumentStore, id: &str, value: serde_json::Value) {
        store
            .set(&format!("products/{}", id), value.as_object().unwrap().clone())
            .unwrap();
    }

    #[test]
    fn test_featured_and_recommended_shelves() {
        let store = DocumentStore::new();
        seed(&store, "a", json!({ "name": "Boots", "price": 80.0, "isFeatured": true }));
        seed(&store, "b", json!({ "name": "Hat", "price": 20.0, "isRecommended": true }));
        seed(
            &store,
            "c",
            json!({ "name": "Coat", "price": 150.0, "isFeatured": true, "isRecommended": true }),
        );

        let featured = featured_products(&store, None).unwrap();
        let names: Vec<_> = featured.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Boots", "Coat"]);
        assert_eq!(featured[0].id, "a");

        let recommended = recommended_products(&store, Some(1)).unwrap();
        assert_eq!(recommended.len(), 1);
        assert_eq!(recommended[0].name, "Hat");
    }

    #[test]
    fn test_malformed_product_fails_shelf() {
        let store = DocumentStore::new();
        seed(&store, "a", json!({ "isFeatured": true }));

        let err = featured_products(&store, None).unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch featured products");
    }
}
