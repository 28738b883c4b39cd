//! Typed field accessors.
//!
//! A selector names fields by their serialized name; compilation resolves each name
//! to a [`Field`] once so that evaluation reads the document directly instead of
//! walking a string path.

use folio_api::{Document, DocumentBody};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Rev,
    Kind,
    UpdatedAt,
    UpdatedBy,
    MemberOf,
    ParentId,
    ParentType,
    Language,
    Slug,
    Title,
    Summary,
    PublishDate,
    ExpiryDate,
    Status,
    AvailableTranslations,
    ParentTags,
    Tags,
    TagType,
    Pinned,
    LanguageCode,
    Name,
    IsDefault,
    RedirectType,
    ToSlug,
    ToDestination,
}

/// Shape of the values a field holds, checked against selector literals at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Timestamp,
    Flag,
    TextSet,
}

impl FieldType {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldType::Text => "a string",
            FieldType::Timestamp => "an integer timestamp",
            FieldType::Flag => "a boolean",
            FieldType::TextSet => "a set of strings",
        }
    }
}

/// A field as read from one document.
///
/// `Absent` means the document's kind does not carry the field at all; `Null`
/// means the field exists but was never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Absent,
    Null,
    Text(&'a str),
    Number(i64),
    Flag(bool),
    Set(&'a BTreeSet<String>),
}

impl FieldValue<'_> {
    pub fn is_present(&self) -> bool {
        !matches!(self, FieldValue::Absent | FieldValue::Null)
    }
}

const ALL_FIELDS: [Field; 26] = [
    Field::Id,
    Field::Rev,
    Field::Kind,
    Field::UpdatedAt,
    Field::UpdatedBy,
    Field::MemberOf,
    Field::ParentId,
    Field::ParentType,
    Field::Language,
    Field::Slug,
    Field::Title,
    Field::Summary,
    Field::PublishDate,
    Field::ExpiryDate,
    Field::Status,
    Field::AvailableTranslations,
    Field::ParentTags,
    Field::Tags,
    Field::TagType,
    Field::Pinned,
    Field::LanguageCode,
    Field::Name,
    Field::IsDefault,
    Field::RedirectType,
    Field::ToSlug,
    Field::ToDestination,
];

impl Field {
    /// Resolve a serialized field name.
    pub fn parse(name: &str) -> Option<Field> {
        ALL_FIELDS.into_iter().find(|field| field.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Field::Id => "_id",
            Field::Rev => "_rev",
            Field::Kind => "type",
            Field::UpdatedAt => "updatedAt",
            Field::UpdatedBy => "updatedBy",
            Field::MemberOf => "memberOf",
            Field::ParentId => "parentId",
            Field::ParentType => "parentType",
            Field::Language => "language",
            Field::Slug => "slug",
            Field::Title => "title",
            Field::Summary => "summary",
            Field::PublishDate => "publishDate",
            Field::ExpiryDate => "expiryDate",
            Field::Status => "status",
            Field::AvailableTranslations => "availableTranslations",
            Field::ParentTags => "parentTags",
            Field::Tags => "tags",
            Field::TagType => "tagType",
            Field::Pinned => "pinned",
            Field::LanguageCode => "languageCode",
            Field::Name => "name",
            Field::IsDefault => "default",
            Field::RedirectType => "redirectType",
            Field::ToSlug => "toSlug",
            Field::ToDestination => "toDestination",
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Field::UpdatedAt | Field::PublishDate | Field::ExpiryDate => FieldType::Timestamp,
            Field::Pinned | Field::IsDefault => FieldType::Flag,
            Field::MemberOf
            | Field::AvailableTranslations
            | Field::ParentTags
            | Field::Tags => FieldType::TextSet,
            _ => FieldType::Text,
        }
    }

    pub fn read<'a>(&self, doc: &'a Document) -> FieldValue<'a> {
        use FieldValue::*;

        match (self, &doc.body) {
            (Field::Id, _) => Text(&doc.id),
            (Field::Rev, _) => opt_text(doc.rev.as_deref()),
            (Field::Kind, _) => Text(doc.kind().as_str()),
            (Field::UpdatedAt, _) => Number(doc.updated_at),
            (Field::UpdatedBy, _) => opt_text(doc.updated_by.as_deref()),
            (Field::MemberOf, _) => Set(&doc.member_of),

            (Field::ParentId, DocumentBody::Content(c)) => Text(&c.parent_id),
            (Field::ParentType, DocumentBody::Content(c)) => Text(c.parent_type.as_str()),
            (Field::Language, DocumentBody::Content(c)) => Text(&c.language),
            (Field::Slug, DocumentBody::Content(c)) => Text(&c.slug),
            (Field::Title, DocumentBody::Content(c)) => Text(&c.title),
            (Field::Summary, DocumentBody::Content(c)) => opt_text(c.summary.as_deref()),
            (Field::PublishDate, DocumentBody::Content(c)) => opt_number(c.publish_date),
            (Field::ExpiryDate, DocumentBody::Content(c)) => opt_number(c.expiry_date),
            (Field::Status, DocumentBody::Content(c)) => Text(c.status.as_str()),
            (Field::AvailableTranslations, DocumentBody::Content(c)) => {
                Set(&c.available_translations)
            }
            (Field::ParentTags, DocumentBody::Content(c)) => Set(&c.parent_tags),

            (Field::Tags, DocumentBody::Post(p)) => Set(&p.tags),
            (Field::Tags, DocumentBody::Tag(t)) => Set(&t.tags),
            (Field::TagType, DocumentBody::Tag(t)) => Text(&t.tag_type),
            (Field::Pinned, DocumentBody::Tag(t)) => Flag(t.pinned),

            (Field::LanguageCode, DocumentBody::Language(l)) => Text(&l.language_code),
            (Field::Name, DocumentBody::Language(l)) => Text(&l.name),
            (Field::IsDefault, DocumentBody::Language(l)) => Flag(l.default),
            (Field::Name, DocumentBody::Group(g)) => Text(&g.name),

            (Field::Slug, DocumentBody::Redirect(r)) => Text(&r.slug),
            (Field::RedirectType, DocumentBody::Redirect(r)) => Text(r.redirect_type.as_str()),
            (Field::ToSlug, DocumentBody::Redirect(r)) => opt_text(r.to_slug.as_deref()),
            (Field::ToDestination, DocumentBody::Redirect(r)) => {
                opt_text(r.to_destination.as_deref())
            }

            _ => Absent,
        }
    }
}

fn opt_text(value: Option<&str>) -> FieldValue<'_> {
    value.map_or(FieldValue::Null, FieldValue::Text)
}

fn opt_number<'a>(value: Option<i64>) -> FieldValue<'a> {
    value.map_or(FieldValue::Null, FieldValue::Number)
}
