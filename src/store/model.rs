//! Records held by a content store

use crate::types::{CommentId, PostId, PostKind, TermId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Meta key holding a module's ordered page list (JSON array of post ids)
pub const META_MODULE_PAGES: &str = "_module_pages";
/// Meta key holding a post's featured image (attachment post id)
pub const META_THUMBNAIL_ID: &str = "_thumbnail_id";
/// Meta key holding an attachment's derived sizes (JSON array of [`SizeEntry`])
pub const META_ATTACHMENT_SIZES: &str = "_attachment_sizes";
/// Meta key holding an attachment's SHA-256 checksum, written at export
pub const META_ATTACHMENT_SHA256: &str = "_attachment_sha256";
/// Meta key flagging a comment as private to its author and instructors
pub const META_COMMENT_PRIVATE: &str = "_private";

/// Site-wide information used for export headers and readme manifests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInfo {
    pub title: String,
    pub url: String,
    /// Base URL under which media files are served
    pub uploads_url: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub admin_email: Option<String>,
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            title: "Modules".to_string(),
            url: "http://localhost".to_string(),
            uploads_url: "http://localhost/uploads".to_string(),
            theme: None,
            plugins: Vec::new(),
            admin_email: None,
        }
    }
}

/// A stored post (module, page or attachment)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub kind: PostKind,
    pub guid: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    pub slug: String,
    pub status: String,
    #[serde(default)]
    pub parent: Option<PostId>,
    #[serde(default)]
    pub author: Option<UserId>,
    pub date: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub menu_order: i64,
    /// Public URL of the media file (attachments only)
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub terms: Vec<TermId>,
}

impl Post {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// Ordered page ids of a module, empty when the list is absent or malformed
    pub fn module_pages(&self) -> Vec<PostId> {
        self.meta(META_MODULE_PAGES)
            .and_then(|raw| serde_json::from_str::<Vec<u64>>(raw).ok())
            .map(|ids| ids.into_iter().map(PostId).collect())
            .unwrap_or_default()
    }
}

/// A stored comment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post: PostId,
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub author_url: String,
    pub date: DateTime<Utc>,
    pub content: String,
    #[serde(default = "default_approved")]
    pub approved: String,
    #[serde(default)]
    pub comment_type: String,
    #[serde(default)]
    pub parent: Option<CommentId>,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

fn default_approved() -> String {
    "1".to_string()
}

/// A taxonomy term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub taxonomy: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent: Option<TermId>,
}

/// A user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Fields accepted when creating a post. Anything not listed here is never
/// written by an import.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub kind: PostKind,
    pub guid: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub slug: String,
    pub status: String,
    pub parent: Option<PostId>,
    pub author: Option<UserId>,
    pub date: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub menu_order: i64,
    pub terms: Vec<TermId>,
}

/// Fields accepted when creating a comment
#[derive(Debug, Clone)]
pub struct NewComment {
    pub post: PostId,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    pub date: DateTime<Utc>,
    pub content: String,
    pub approved: String,
    pub comment_type: String,
    pub parent: Option<CommentId>,
    pub user: Option<UserId>,
}

/// Fields accepted when creating a term
#[derive(Debug, Clone)]
pub struct NewTerm {
    pub taxonomy: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub parent: Option<TermId>,
}

/// Fields accepted when creating a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
}

/// One derived-size variant of an image attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEntry {
    pub width: u32,
    pub height: u32,
    /// File name of the variant, in the same directory as the original
    pub file: String,
}

/// A derived size as generated on the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedSize {
    pub width: u32,
    pub height: u32,
    pub url: String,
}

/// Existing identities on the store, for bulk prefetch before an import
#[derive(Debug, Clone, Default)]
pub struct StoreFingerprints {
    pub posts: Vec<(String, PostId)>,
    pub comments: Vec<(String, DateTime<Utc>, CommentId)>,
    pub terms: Vec<(String, String, TermId)>,
    pub users: Vec<(String, UserId)>,
}
