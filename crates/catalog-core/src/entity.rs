//! Catalog records and the trait the cache layer needs from them.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

/// A record that can be cached under its own namespace.
///
/// The namespace is part of every cache key built for the type
/// (`{namespace}:{id}`, `{namespace}:list:...`) and must stay stable across releases.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Cache namespace, e.g. `"product"`.
    const NAMESPACE: &'static str;

    /// Identifier of this record.
    fn id(&self) -> &str;

    /// Key patterns in *other* namespaces whose cached values embed records of this type.
    ///
    /// These are not deleted on the request path. They travel with the domain
    /// event and are invalidated by subscriber processes.
    fn dependent_patterns() -> Vec<String> {
        Vec::new()
    }
}

/// A sellable catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    pub price_cents: i64,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn default_in_stock() -> bool {
    true
}

impl Product {
    /// Create a product stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        sku: impl Into<String>,
        name: impl Into<String>,
        price_cents: i64,
    ) -> Self {
        Self {
            id: id.into(),
            sku: sku.into(),
            name: name.into(),
            description: None,
            category_id: None,
            price_cents,
            in_stock: true,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Entity for Product {
    const NAMESPACE: &'static str = "product";

    fn id(&self) -> &str {
        &self.id
    }

    // Category listings carry per-category product counts.
    fn dependent_patterns() -> Vec<String> {
        vec![crate::keys::list_pattern(Category::NAMESPACE)]
    }
}

/// A node in the catalog's category tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
        }
    }
}

impl Entity for Category {
    const NAMESPACE: &'static str = "category";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_dependent_patterns_cover_category_lists() {
        assert_eq!(Product::dependent_patterns(), vec!["category:list:*".to_string()]);
    }

    #[test]
    fn test_category_has_no_dependents() {
        let category = Category::new("c1", "Lighting");
        assert_eq!(category.id(), "c1");
        assert!(Category::dependent_patterns().is_empty());
        assert_eq!(Category::NAMESPACE, "category");
    }

    #[test]
    fn test_product_defaults_when_deserializing() {
        let json = serde_json::json!({
            "id": "p1",
            "sku": "SKU-1",
            "name": "Lamp",
            "price_cents": 100,
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let product: Product = serde_json::from_value(json).unwrap();
        assert!(product.in_stock);
        assert_eq!(product.category_id, None);
    }
}
