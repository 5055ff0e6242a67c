//! Relationships that could not be resolved when their record was imported

use crate::types::{CommentId, CommentOldId, PostId, PostOldId, TermFingerprint, TermId, UserKey};
use std::fmt;

/// A relationship waiting for the post-processing pass.
///
/// Every variant names the destination entity to patch and the source-side
/// key of what it should point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredFixup {
    /// Post whose parent was imported later in the document (or never)
    PostParent { post: PostId, old_parent: PostOldId },
    /// Post whose author was not mapped at creation time
    PostAuthor { post: PostId, author: UserKey },
    /// Comment whose parent comment was not mapped yet
    CommentParent {
        comment: CommentId,
        old_parent: CommentOldId,
    },
    /// Comment by a logged-in user that was not mapped yet
    CommentAuthor { comment: CommentId, user: UserKey },
    /// Term whose parent term was not mapped yet
    TermParent {
        term: TermId,
        parent: TermFingerprint,
    },
    /// Post whose featured image references a source attachment id
    FeaturedImage {
        post: PostId,
        old_attachment: PostOldId,
    },
    /// Post whose content may embed source URLs or source ids
    ContentReferences { post: PostId },
}

impl DeferredFixup {
    /// Short name of the relationship kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PostParent { .. } => "post parent",
            Self::PostAuthor { .. } => "post author",
            Self::CommentParent { .. } => "comment parent",
            Self::CommentAuthor { .. } => "comment author",
            Self::TermParent { .. } => "term parent",
            Self::FeaturedImage { .. } => "featured image",
            Self::ContentReferences { .. } => "content references",
        }
    }
}

impl fmt::Display for DeferredFixup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostParent { post, old_parent } => {
                write!(f, "post {} -> parent {}", post, old_parent)
            }
            Self::PostAuthor { post, author } => write!(f, "post {} -> author {}", post, author),
            Self::CommentParent {
                comment,
                old_parent,
            } => write!(f, "comment {} -> parent {}", comment, old_parent),
            Self::CommentAuthor { comment, user } => {
                write!(f, "comment {} -> user {}", comment, user)
            }
            Self::TermParent { term, parent } => write!(f, "term {} -> parent {}", term, parent),
            Self::FeaturedImage {
                post,
                old_attachment,
            } => write!(f, "post {} -> featured image {}", post, old_attachment),
            Self::ContentReferences { post } => write!(f, "post {} content", post),
        }
    }
}
