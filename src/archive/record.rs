//! Records carried by an archive document
//!
//! Every id in these types is a source-system id. They are only unique within
//! one archive and must be remapped before touching a destination store.

use crate::types::{CommentOldId, PostKind, PostOldId};
use crate::util::truncate_str;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document header
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub format_version: String,
    pub generator: String,
    pub site_title: String,
    pub site_url: String,
    pub uploads_url: String,
    pub module_id: Option<PostOldId>,
    pub created: Option<DateTime<Utc>>,
}

/// An author referenced by the exported content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: u64,
    pub login: String,
    pub email: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
}

/// Which list element a term was written as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermKind {
    Category,
    Tag,
    Custom,
}

impl TermKind {
    /// Kind used for a taxonomy name
    pub fn for_taxonomy(taxonomy: &str) -> Self {
        match taxonomy {
            "category" => Self::Category,
            "post_tag" => Self::Tag,
            _ => Self::Custom,
        }
    }

    /// Element name in the document
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Category => super::tag::CATEGORY,
            Self::Tag => super::tag::TAG,
            Self::Custom => super::tag::TERM,
        }
    }

    /// Emission order: categories, then tags, then custom taxonomies
    pub fn rank(&self) -> u8 {
        match self {
            Self::Category => 0,
            Self::Tag => 1,
            Self::Custom => 2,
        }
    }
}

/// A taxonomy term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermRecord {
    pub kind: TermKind,
    pub id: u64,
    pub taxonomy: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    /// Slug of the parent term in the same taxonomy
    pub parent_slug: Option<String>,
}

/// A term association on an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRef {
    pub taxonomy: String,
    pub slug: String,
    pub name: String,
}

/// One key/value metadata pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPair {
    pub key: String,
    pub value: String,
}

impl MetaPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A comment on an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: CommentOldId,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    /// Source user id of a logged-in commenter
    pub user_id: Option<u64>,
    pub date: DateTime<Utc>,
    pub content: String,
    pub approved: String,
    pub comment_type: String,
    pub parent: Option<CommentOldId>,
    pub meta: Vec<MetaPair>,
}

/// One exported content entity: a module, a page or an attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: PostOldId,
    pub kind: PostKind,
    pub guid: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub slug: String,
    pub status: String,
    pub parent: Option<PostOldId>,
    /// Login of the author
    pub creator: Option<String>,
    pub date: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub menu_order: i64,
    /// Source URL of the media file (attachments only)
    pub attachment_url: Option<String>,
    pub terms: Vec<TermRef>,
    pub meta: Vec<MetaPair>,
    pub comments: Vec<CommentRecord>,
}

impl ItemRecord {
    /// First value stored under `key`
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }
}

/// A complete top-level record decoded from the document
#[derive(Debug, Clone)]
pub enum Record {
    Header(ArchiveHeader),
    Author(AuthorRecord),
    Term(TermRecord),
    Item(Box<ItemRecord>),
}

impl Record {
    /// Short label for logs and progress messages
    pub fn label(&self) -> String {
        match self {
            Record::Header(_) => "header".to_string(),
            Record::Author(a) => format!("author {}", a.login),
            Record::Term(t) => format!("term {}:{}", t.taxonomy, t.slug),
            Record::Item(i) => format!("{} {} \"{}\"", i.kind, i.id, truncate_str(&i.title, 60)),
        }
    }
}
