//! Plain data types shared by the editing client, the reading client and the
//! consistency layer.

pub mod document;
pub mod value;

pub use document::{
    ContentBody, ContentStatus, Document, DocumentBody, DocumentKind, GroupBody, LanguageBody,
    ParentType, PostBody, RedirectBody, RedirectType, TagBody, Timestamp, BOOKKEEPING_FIELDS,
};
pub use value::Value;

/// Current wall-clock time as a document timestamp (Unix milliseconds).
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Generate an id for a document created on this device.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
