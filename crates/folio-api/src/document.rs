//! The universal document record.
//!
//! Every record in the local cache and on the remote service is a [`Document`]:
//! a fixed set of common fields plus a kind-specific [`DocumentBody`]. References
//! between documents (`parentId`, `parentTags`, `language`) are plain ids resolved
//! by lookup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Logical timestamp, Unix milliseconds.
pub type Timestamp = i64;

/// Serialized names of the bookkeeping fields rewritten on every server round-trip.
///
/// Comparisons that decide whether a user changed something ignore these.
pub const BOOKKEEPING_FIELDS: [&str; 3] = ["_rev", "updatedAt", "updatedBy"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    /// Revision tag assigned by the remote service.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Access groups this document belongs to.
    #[serde(default)]
    pub member_of: BTreeSet<String>,
    #[serde(flatten)]
    pub body: DocumentBody,
}

/// Kind-specific part of a document, discriminated by the serialized `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DocumentBody {
    Content(ContentBody),
    Post(PostBody),
    Tag(TagBody),
    Language(LanguageBody),
    Redirect(RedirectBody),
    Group(GroupBody),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentKind {
    Content,
    Post,
    Tag,
    Language,
    Redirect,
    Group,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 6] = [
        DocumentKind::Content,
        DocumentKind::Post,
        DocumentKind::Tag,
        DocumentKind::Language,
        DocumentKind::Redirect,
        DocumentKind::Group,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Content => "content",
            DocumentKind::Post => "post",
            DocumentKind::Tag => "tag",
            DocumentKind::Language => "language",
            DocumentKind::Redirect => "redirect",
            DocumentKind::Group => "group",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentStatus {
    #[default]
    Draft,
    Published,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParentType {
    #[default]
    Post,
    Tag,
}

impl ParentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentType::Post => "post",
            ParentType::Tag => "tag",
        }
    }
}

/// One language version of a post or tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBody {
    pub parent_id: String,
    #[serde(default)]
    pub parent_type: ParentType,
    pub language: String,
    pub slug: String,
    #[serde(default)]
    pub title: String,
    pub summary: Option<String>,
    pub text: Option<String>,
    pub publish_date: Option<Timestamp>,
    pub expiry_date: Option<Timestamp>,
    #[serde(default)]
    pub status: ContentStatus,
    /// Languages known to have a version of the same parent, this one included.
    #[serde(default)]
    pub available_translations: BTreeSet<String>,
    #[serde(default)]
    pub parent_tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostBody {
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagBody {
    #[serde(default)]
    pub tag_type: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageBody {
    pub language_code: String,
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RedirectType {
    #[default]
    Permanent,
    Temporary,
}

impl RedirectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectType::Permanent => "permanent",
            RedirectType::Temporary => "temporary",
        }
    }
}

/// Redirects resolution of `slug` to another slug or to a named destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectBody {
    pub slug: String,
    #[serde(default)]
    pub redirect_type: RedirectType,
    pub to_slug: Option<String>,
    pub to_destination: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBody {
    pub name: String,
}

impl Document {
    pub fn new(id: impl Into<String>, body: DocumentBody) -> Self {
        Self {
            id: id.into(),
            rev: None,
            updated_at: 0,
            updated_by: None,
            member_of: BTreeSet::new(),
            body,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.member_of = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn kind(&self) -> DocumentKind {
        match &self.body {
            DocumentBody::Content(_) => DocumentKind::Content,
            DocumentBody::Post(_) => DocumentKind::Post,
            DocumentBody::Tag(_) => DocumentKind::Tag,
            DocumentBody::Language(_) => DocumentKind::Language,
            DocumentBody::Redirect(_) => DocumentKind::Redirect,
            DocumentBody::Group(_) => DocumentKind::Group,
        }
    }

    /// Natural key used for live resolution, carried by content and redirect documents.
    pub fn slug(&self) -> Option<&str> {
        match &self.body {
            DocumentBody::Content(content) => Some(&content.slug),
            DocumentBody::Redirect(redirect) => Some(&redirect.slug),
            _ => None,
        }
    }

    pub fn as_content(&self) -> Option<&ContentBody> {
        match &self.body {
            DocumentBody::Content(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_content_mut(&mut self) -> Option<&mut ContentBody> {
        match &mut self.body {
            DocumentBody::Content(content) => Some(content),
            _ => None,
        }
    }

    pub fn as_redirect(&self) -> Option<&RedirectBody> {
        match &self.body {
            DocumentBody::Redirect(redirect) => Some(redirect),
            _ => None,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.body, DocumentBody::Redirect(_))
    }

    /// Equality ignoring [`BOOKKEEPING_FIELDS`].
    pub fn same_content(&self, other: &Document) -> bool {
        self.id == other.id && self.member_of == other.member_of && self.body == other.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(slug: &str) -> Document {
        Document::new(
            "c1",
            DocumentBody::Content(ContentBody {
                parent_id: "p1".to_string(),
                language: "en".to_string(),
                slug: slug.to_string(),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_same_content_ignores_bookkeeping() {
        let a = content("hello");
        let mut b = a.clone();
        b.rev = Some("2-abc".to_string());
        b.updated_at = 99;
        b.updated_by = Some("editor".to_string());

        assert_ne!(a, b);
        assert!(a.same_content(&b));

        b.as_content_mut().unwrap().title = "Changed".to_string();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_deserialize_tagged_document() {
        let doc: Document = serde_json::from_value(json!({
            "_id": "r1",
            "_rev": "1-x",
            "type": "redirect",
            "memberOf": ["public"],
            "slug": "old",
            "toSlug": "new"
        }))
        .unwrap();

        assert_eq!(doc.kind(), DocumentKind::Redirect);
        assert_eq!(doc.slug(), Some("old"));
        assert_eq!(doc.as_redirect().unwrap().to_slug.as_deref(), Some("new"));
        assert!(doc.member_of.contains("public"));
        assert_eq!(doc.updated_at, 0);
    }

    #[test]
    fn test_serialize_uses_type_discriminant() {
        let json = serde_json::to_value(content("hello")).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["_id"], "c1");
        assert_eq!(json["parentId"], "p1");
        assert!(json.get("_rev").is_none());
    }

    #[test]
    fn test_kind_names() {
        for kind in DocumentKind::ALL {
            assert_eq!(DocumentKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(DocumentKind::from_str("page"), None);
    }
}
