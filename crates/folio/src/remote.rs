//! Collaborators reached over the network or through the UI.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use folio_api::Document;
use folio_core::Selector;

use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// A selector-shaped query plus paging and the viewer's access-group allowlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteQuery {
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    pub member_of: Vec<String>,
}

impl RemoteQuery {
    pub fn new(selector: Selector, member_of: Vec<String>) -> Self {
        Self {
            selector,
            limit: None,
            skip: None,
            sort: Vec::new(),
            member_of,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }
}

/// Answer to a [`RemoteQuery`]. An empty match list is never used to mean "no match".
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteAnswer {
    Matches(Vec<Document>),
    NoMatch,
}

impl RemoteAnswer {
    /// Normalise a raw result list so that empty becomes [`RemoteAnswer::NoMatch`].
    pub fn from_documents(docs: Vec<Document>) -> Self {
        if docs.is_empty() {
            RemoteAnswer::NoMatch
        } else {
            RemoteAnswer::Matches(docs)
        }
    }

    pub fn first(&self) -> Option<&Document> {
        match self {
            RemoteAnswer::Matches(docs) => docs.first(),
            RemoteAnswer::NoMatch => None,
        }
    }
}

#[async_trait]
pub trait RemoteDocumentService: Send + Sync {
    async fn query(&self, query: RemoteQuery) -> Result<RemoteAnswer, RemoteError>;
}

/// Where a redirect document points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum RedirectTarget {
    /// Another natural key to resolve
    Key(String),
    /// A named destination outside key resolution
    Destination(String),
}

impl RedirectTarget {
    /// Target of a redirect document. A named destination takes precedence over a key.
    pub fn of(doc: &Document) -> Option<RedirectTarget> {
        let redirect = doc.as_redirect()?;
        redirect
            .to_destination
            .clone()
            .map(RedirectTarget::Destination)
            .or_else(|| redirect.to_slug.clone().map(RedirectTarget::Key))
    }
}

/// Performs navigation for a redirect. Resolution only decides that one happened.
pub trait RedirectHandler: Send + Sync {
    fn redirect(&self, from_key: &str, target: &RedirectTarget, redirect: &Document);
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_api::{DocumentBody, RedirectBody};
    use serde_json::json;

    #[test]
    fn test_query_serializes_selector_inline() {
        let query = RemoteQuery::new(Selector::eq("slug", "hello"), vec!["public".to_string()])
            .with_limit(1)
            .sorted_by("updatedAt", SortDirection::Desc);

        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({
                "selector": {"slug": "hello"},
                "limit": 1,
                "sort": [{"field": "updatedAt", "direction": "desc"}],
                "memberOf": ["public"]
            })
        );
    }

    #[test]
    fn test_empty_result_is_no_match() {
        assert_eq!(RemoteAnswer::from_documents(vec![]), RemoteAnswer::NoMatch);
    }

    #[test]
    fn test_redirect_target_precedence() {
        let mut doc = Document::new(
            "r1",
            DocumentBody::Redirect(RedirectBody {
                slug: "old".to_string(),
                to_slug: Some("new".to_string()),
                ..Default::default()
            }),
        );
        assert_eq!(RedirectTarget::of(&doc), Some(RedirectTarget::Key("new".to_string())));

        if let DocumentBody::Redirect(r) = &mut doc.body {
            r.to_destination = Some("home".to_string());
        }
        assert_eq!(
            RedirectTarget::of(&doc),
            Some(RedirectTarget::Destination("home".to_string()))
        );
    }
}
