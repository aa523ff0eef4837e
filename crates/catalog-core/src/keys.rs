//! Cache key naming convention.
//!
//! | Purpose            | Format                                  |
//! |--------------------|-----------------------------------------|
//! | Single entity      | `{namespace}:{id}`                      |
//! | Collection query   | `{namespace}:list:{sorted-filter}`      |
//! | Collection count   | `{namespace}:list:count:{sorted-filter}`|
//! | Distributed lock   | `{namespace}:lock:{key}`                |
//! | Rate-limit window  | `rate_limit:{subject}`                  |
//!
//! These formats are shared by every process reading the same store, so they
//! must not change between versions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter parameter names reserved for pagination.
pub const OFFSET_PARAM: &str = "offset";
pub const LIMIT_PARAM: &str = "limit";

/// Canonical form of an empty filter.
const EMPTY_FILTER: &str = "all";

/// Key for a single entity.
#[inline]
pub fn entity_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// Key for a collection query.
pub fn list_key(namespace: &str, filter: &ListFilter) -> String {
    format!("{namespace}:list:{}", filter.canonical())
}

/// Key for a collection count.
pub fn count_key(namespace: &str, filter: &ListFilter) -> String {
    format!("{namespace}:list:count:{}", filter.canonical())
}

/// Pattern matching every collection key (lists and counts) in a namespace.
pub fn list_pattern(namespace: &str) -> String {
    format!("{namespace}:list:*")
}

/// Lock key guarding repopulation of `key`.
#[inline]
pub fn lock_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:lock:{key}")
}

/// Key of a subject's rate-limit window.
#[inline]
pub fn rate_limit_key(subject: &str) -> String {
    format!("rate_limit:{subject}")
}

/// Collection query filter.
///
/// Parameters are kept sorted so the same logical query always renders to the
/// same cache key regardless of the order the caller supplied them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    params: BTreeMap<String, String>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy of this filter with the page window folded into it.
    pub fn paged(&self, offset: usize, limit: usize) -> Self {
        self.clone()
            .with(OFFSET_PARAM, offset.to_string())
            .with(LIMIT_PARAM, limit.to_string())
    }

    /// Sorted, URL-encoded `name=value` pairs joined with `&`.
    pub fn canonical(&self) -> String {
        if self.params.is_empty() {
            return EMPTY_FILTER.to_string();
        }
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Whether a JSON record satisfies every non-pagination parameter.
    ///
    /// Field values are compared by their string rendering, so `price_cents=100`
    /// matches the number `100` and `in_stock=true` matches the boolean.
    pub fn matches(&self, record: &Value) -> bool {
        self.params
            .iter()
            .filter(|(k, _)| k.as_str() != OFFSET_PARAM && k.as_str() != LIMIT_PARAM)
            .all(|(k, expected)| match record.get(k) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *expected,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_is_order_independent() {
        let a = ListFilter::new().with("category_id", "c1").with("in_stock", "true");
        let b = ListFilter::new().with("in_stock", "true").with("category_id", "c1");
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "category_id=c1&in_stock=true");
    }

    #[test]
    fn test_canonical_escapes_separators() {
        let f = ListFilter::new().with("name", "a&b=c");
        assert_eq!(f.canonical(), "name=a%26b%3Dc");
    }

    #[test]
    fn test_empty_filter_key() {
        assert_eq!(list_key("product", &ListFilter::new()), "product:list:all");
        assert_eq!(count_key("product", &ListFilter::new()), "product:list:count:all");
    }

    #[test]
    fn test_key_formats() {
        assert_eq!(entity_key("product", "42"), "product:42");
        assert_eq!(lock_key("product", "product:42"), "product:lock:product:42");
        assert_eq!(rate_limit_key("ip:10.0.0.1"), "rate_limit:ip:10.0.0.1");
        assert_eq!(list_pattern("product"), "product:list:*");
    }

    #[test]
    fn test_paged_folds_window_into_key() {
        let f = ListFilter::new().with("category_id", "c1");
        assert_eq!(
            list_key("product", &f.paged(20, 10)),
            "product:list:category_id=c1&limit=10&offset=20"
        );
    }

    #[test]
    fn test_matches_compares_rendered_values() {
        let record = json!({"category_id": "c1", "price_cents": 100, "in_stock": true});
        assert!(ListFilter::new().with("category_id", "c1").matches(&record));
        assert!(ListFilter::new().with("price_cents", "100").matches(&record));
        assert!(ListFilter::new().with("in_stock", "true").matches(&record));
        assert!(!ListFilter::new().with("category_id", "c2").matches(&record));
        assert!(!ListFilter::new().with("missing", "x").matches(&record));
        // Pagination parameters never filter records out.
        assert!(ListFilter::new().paged(0, 1).matches(&record));
    }
}
