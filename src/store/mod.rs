//! Content store interface
//!
//! The migration pipeline never talks to a CMS directly. Everything it needs
//! from post/comment/term/user persistence goes through [`ContentStore`], so
//! the export and import engines can run against any backend. [`MemoryStore`]
//! is a JSON-file backed implementation used by the CLI and the tests.

mod memory;
mod model;

pub use memory::MemoryStore;
pub use model::{
    Comment, DerivedSize, NewComment, NewPost, NewTerm, NewUser, Post, SiteInfo, SizeEntry,
    StoreFingerprints, Term, User, META_ATTACHMENT_SHA256, META_ATTACHMENT_SIZES,
    META_COMMENT_PRIVATE, META_MODULE_PAGES, META_THUMBNAIL_ID,
};

use crate::types::{CommentId, PostId, TermFingerprint, TermId, UserId};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by a content store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence operations the export and import engines depend on
pub trait ContentStore: Send {
    /// Site-wide information (title, URLs, theme, plugins)
    fn site_info(&self) -> SiteInfo;

    fn post(&self, id: PostId) -> Result<Option<Post>, StoreError>;

    /// Fetch several posts in one round trip, in the order requested.
    /// Missing ids are silently omitted.
    fn posts(&self, ids: &[PostId]) -> Result<Vec<Post>, StoreError>;

    fn comments_for_post(&self, id: PostId) -> Result<Vec<Comment>, StoreError>;

    fn term(&self, id: TermId) -> Result<Option<Term>, StoreError>;

    fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Attachment whose stored URL is exactly `url`
    fn attachment_by_url(&self, url: &str) -> Result<Option<PostId>, StoreError>;

    /// Attachments whose file name (last URL segment) equals `file_name`
    fn attachments_by_basename(&self, file_name: &str) -> Result<Vec<PostId>, StoreError>;

    /// Absolute path of an attachment's file in media storage
    fn attachment_file(&self, id: PostId) -> Result<Option<PathBuf>, StoreError>;

    fn find_post_by_guid(&self, guid: &str) -> Result<Option<PostId>, StoreError>;

    fn find_comment(
        &self,
        author_name: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<CommentId>, StoreError>;

    fn find_term(&self, fingerprint: &TermFingerprint) -> Result<Option<TermId>, StoreError>;

    fn find_user_by_login(&self, login: &str) -> Result<Option<UserId>, StoreError>;

    /// Every identity the store currently holds, for bulk prefetch
    fn fingerprints(&self) -> Result<StoreFingerprints, StoreError>;

    fn insert_post(&mut self, post: NewPost) -> Result<PostId, StoreError>;

    /// Create an attachment post, moving `file` into media storage under
    /// `relative_path`. Returns the new id and the public URL of the file.
    fn insert_attachment(
        &mut self,
        post: NewPost,
        file: &Path,
        relative_path: &str,
    ) -> Result<(PostId, String), StoreError>;

    /// Regenerate derived-size variants for an image attachment
    fn generate_derived_sizes(&mut self, id: PostId) -> Result<Vec<DerivedSize>, StoreError>;

    fn insert_comment(&mut self, comment: NewComment) -> Result<CommentId, StoreError>;

    fn insert_term(&mut self, term: NewTerm) -> Result<TermId, StoreError>;

    fn insert_user(&mut self, user: NewUser) -> Result<UserId, StoreError>;

    fn set_post_meta(&mut self, id: PostId, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove one meta key from one post. Returns whether it was present.
    fn delete_post_meta(&mut self, id: PostId, key: &str) -> Result<bool, StoreError>;

    /// Remove a meta key from every post. Returns how many posts changed.
    fn delete_post_meta_by_key(&mut self, key: &str) -> Result<usize, StoreError>;

    fn update_post_parent(&mut self, id: PostId, parent: PostId) -> Result<(), StoreError>;

    fn update_post_author(&mut self, id: PostId, author: UserId) -> Result<(), StoreError>;

    fn update_post_content(&mut self, id: PostId, content: &str) -> Result<(), StoreError>;

    fn set_comment_meta(&mut self, id: CommentId, key: &str, value: &str)
        -> Result<(), StoreError>;

    fn update_comment_parent(&mut self, id: CommentId, parent: CommentId)
        -> Result<(), StoreError>;

    fn update_comment_user(&mut self, id: CommentId, user: UserId) -> Result<(), StoreError>;

    fn update_term_parent(&mut self, id: TermId, parent: TermId) -> Result<(), StoreError>;
}
