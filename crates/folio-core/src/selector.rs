//! Declarative filter trees.
//!
//! A [`Selector`] is plain JSON-shaped data in the Mango style:
//!
//! ```json
//! { "$and": [
//!     { "type": "content" },
//!     { "publishDate": { "$lte": 1700000000000 } },
//!     { "memberOf": { "$elemMatch": { "$in": ["public"] } } }
//! ] }
//! ```
//!
//! It is never interpreted directly: [`crate::compile`] validates it and turns it
//! into a predicate. Because it serializes transparently it is also the query shape
//! sent to the remote document service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(Json);

impl Selector {
    pub fn from_json(value: Json) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &Json {
        &self.0
    }

    pub fn into_json(self) -> Json {
        self.0
    }

    /// The empty selector, which matches every document.
    pub fn always() -> Self {
        Self(json!({}))
    }

    /// `{ field: value }`
    pub fn eq(field: &str, value: impl Into<Json>) -> Self {
        let mut map = serde_json::Map::new();
        map.insert(field.to_string(), value.into());
        Self(Json::Object(map))
    }

    /// `{ field: { operator: value } }`
    pub fn op(field: &str, operator: &str, value: impl Into<Json>) -> Self {
        let mut condition = serde_json::Map::new();
        condition.insert(operator.to_string(), value.into());
        Self::eq(field, Json::Object(condition))
    }

    /// `{ field: { "$elemMatch": { "$in": values } } }`
    pub fn any_of(field: &str, values: &[String]) -> Self {
        Self::op(field, "$elemMatch", json!({ "$in": values }))
    }

    /// `{ field: { "$not": { "$elemMatch": { "$in": values } } } }`
    pub fn none_of(field: &str, values: &[String]) -> Self {
        Self::op(field, "$not", json!({ "$elemMatch": { "$in": values } }))
    }

    pub fn and(children: Vec<Selector>) -> Self {
        Self(json!({ "$and": children.into_iter().map(Selector::into_json).collect::<Vec<_>>() }))
    }

    pub fn or(children: Vec<Selector>) -> Self {
        Self(json!({ "$or": children.into_iter().map(Selector::into_json).collect::<Vec<_>>() }))
    }

    pub fn not(inner: Selector) -> Self {
        Self(json!({ "$not": inner.into_json() }))
    }
}

impl From<Json> for Selector {
    fn from(value: Json) -> Self {
        Self(value)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_produce_mango_shape() {
        let selector = Selector::and(vec![
            Selector::eq("type", "content"),
            Selector::op("publishDate", "$lte", 100),
            Selector::any_of("memberOf", &["public".to_string()]),
        ]);

        assert_eq!(
            selector.as_json(),
            &json!({ "$and": [
                { "type": "content" },
                { "publishDate": { "$lte": 100 } },
                { "memberOf": { "$elemMatch": { "$in": ["public"] } } }
            ]})
        );
    }

    #[test]
    fn test_serializes_transparently() {
        let selector = Selector::not(Selector::eq("status", "draft"));
        let text = serde_json::to_string(&selector).unwrap();
        assert_eq!(text, r#"{"$not":{"status":"draft"}}"#);

        let back: Selector = serde_json::from_str(&text).unwrap();
        assert_eq!(back, selector);
    }
}
