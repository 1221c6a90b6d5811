//! Document and tag records, request types, and bucket layout.
//!
//! Documents are stored as camelCase JSON. Public documents live under
//! `wiki/{id}.json` as plain JSON; restricted ones live under
//! `secrets/{id}.json` as cipher text of that same JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DocumentError;

/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 200;

/// Maximum category length in characters.
pub const CATEGORY_MAX_CHARS: usize = 100;

/// Maximum tag name length in characters.
pub const TAG_NAME_MAX_CHARS: usize = 50;

/// Category assigned when none is given.
pub const DEFAULT_CATEGORY: &str = "General";

/// A wiki page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: u64,
    pub title: String,
    /// Markdown source.
    pub content: String,
    pub category: String,
    /// Encrypted at rest and hidden behind the access gate.
    pub restricted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sorted by tag id, no duplicates.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Document {
    /// The bucket this document belongs in.
    #[must_use]
    pub fn bucket(&self) -> Bucket {
        Bucket::for_restricted(self.restricted)
    }
}

/// A label that can be attached to many documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
    /// `#rrggbb`.
    pub color: String,
}

/// Fields for creating a document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewDocument {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub restricted: bool,
    /// Tag ids.
    #[serde(default)]
    pub tags: Vec<u64>,
}

/// A partial update. Only the fields listed here can change; anything else
/// in the request body is rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub restricted: Option<bool>,
    /// Replaces the tag set; ids are resolved against the registry.
    pub tags: Option<Vec<u64>>,
}

impl DocumentPatch {
    /// Whether the patch names no field at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.category.is_none()
            && self.restricted.is_none()
            && self.tags.is_none()
    }
}

/// Fields for creating a tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTag {
    pub name: String,
    pub color: String,
}

/// One of the two storage partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Plain JSON under `wiki/`.
    Public,
    /// Cipher text under `secrets/`.
    Secret,
}

impl Bucket {
    /// Both buckets, public first.
    pub const ALL: [Bucket; 2] = [Bucket::Public, Bucket::Secret];

    #[must_use]
    pub fn for_restricted(restricted: bool) -> Self {
        if restricted { Self::Secret } else { Self::Public }
    }

    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Public => Self::Secret,
            Self::Secret => Self::Public,
        }
    }

    /// Key prefix of this bucket, including the trailing `/`.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Public => "wiki/",
            Self::Secret => "secrets/",
        }
    }

    /// Storage key of document `id` in this bucket.
    #[must_use]
    pub fn key(self, id: u64) -> String {
        format!("{}{id}.json", self.prefix())
    }

    /// Parse a document id back out of a key of this bucket.
    #[must_use]
    pub fn parse_key(self, key: &str) -> Option<u64> {
        key.strip_prefix(self.prefix())?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }
}

/// Trim and check a title.
pub(crate) fn normalize_title(title: &str) -> Result<String, DocumentError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(invalid("title must not be empty"));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(invalid(&format!(
            "title exceeds {TITLE_MAX_CHARS} characters"
        )));
    }
    Ok(title.to_owned())
}

/// Trim a category, defaulting empty ones.
pub(crate) fn normalize_category(category: &str) -> Result<String, DocumentError> {
    let category = category.trim();
    if category.is_empty() {
        return Ok(DEFAULT_CATEGORY.to_owned());
    }
    if category.chars().count() > CATEGORY_MAX_CHARS {
        return Err(invalid(&format!(
            "category exceeds {CATEGORY_MAX_CHARS} characters"
        )));
    }
    Ok(category.to_owned())
}

/// Trim and check a tag name and color.
pub(crate) fn normalize_tag(tag: &NewTag) -> Result<(String, String), DocumentError> {
    let name = tag.name.trim();
    if name.is_empty() {
        return Err(invalid("tag name must not be empty"));
    }
    if name.chars().count() > TAG_NAME_MAX_CHARS {
        return Err(invalid(&format!(
            "tag name exceeds {TAG_NAME_MAX_CHARS} characters"
        )));
    }

    let color = tag.color.trim();
    let is_hex_color = color.len() == 7
        && color.starts_with('#')
        && color[1..].bytes().all(|b| b.is_ascii_hexdigit());
    if !is_hex_color {
        return Err(invalid("tag color must look like #rrggbb"));
    }

    Ok((name.to_owned(), color.to_ascii_lowercase()))
}

fn invalid(reason: &str) -> DocumentError {
    DocumentError::Validation {
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bucket_keys_roundtrip_ids() {
        assert_eq!(Bucket::Public.key(12), "wiki/12.json");
        assert_eq!(Bucket::Secret.key(12), "secrets/12.json");
        assert_eq!(Bucket::Secret.parse_key("secrets/12.json"), Some(12));
        assert_eq!(Bucket::Public.parse_key("secrets/12.json"), None);
        assert_eq!(Bucket::Public.parse_key("wiki/notes.json"), None);
        assert_eq!(Bucket::Public.parse_key("wiki/12.txt"), None);
    }

    #[test]
    fn title_is_trimmed_and_required() {
        assert_eq!(normalize_title("  Onboarding ").unwrap(), "Onboarding");
        assert!(matches!(
            normalize_title("   "),
            Err(DocumentError::Validation { .. })
        ));
        assert!(normalize_title(&"x".repeat(TITLE_MAX_CHARS + 1)).is_err());
    }

    #[test]
    fn empty_category_defaults() {
        assert_eq!(normalize_category(" ").unwrap(), DEFAULT_CATEGORY);
        assert_eq!(normalize_category(" IT ").unwrap(), "IT");
    }

    #[test]
    fn tag_color_must_be_hex() {
        let ok = NewTag {
            name: " Ops ".to_owned(),
            color: "#A1B2C3".to_owned(),
        };
        assert_eq!(
            normalize_tag(&ok).unwrap(),
            ("Ops".to_owned(), "#a1b2c3".to_owned())
        );

        for color in ["red", "#12345", "#1234567", "#ggggggg", "123456#"] {
            let bad = NewTag {
                name: "Ops".to_owned(),
                color: color.to_owned(),
            };
            assert!(normalize_tag(&bad).is_err(), "{color} should be rejected");
        }
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let err = serde_json::from_str::<DocumentPatch>(r#"{"title":"x","owner":"me"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"));

        let patch: DocumentPatch = serde_json::from_str(r#"{"restricted":true}"#).unwrap();
        assert_eq!(patch.restricted, Some(true));
        assert!(patch.title.is_none());
    }

    #[test]
    fn new_document_defaults_optional_fields() {
        let new: NewDocument = serde_json::from_str(r#"{"title":"Doc"}"#).unwrap();
        assert_eq!(new.content, "");
        assert!(!new.restricted);
        assert!(new.tags.is_empty());
    }

    #[test]
    fn document_serializes_camel_case() {
        let now = Utc::now();
        let doc = Document {
            id: 1,
            title: "T".to_owned(),
            content: String::new(),
            category: DEFAULT_CATEGORY.to_owned(),
            restricted: false,
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("created_at").is_none());
    }
}
