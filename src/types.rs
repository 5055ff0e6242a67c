//! Core identifier types shared by export and import
//!
//! Destination-side ids (`PostId`, `CommentId`, ...) are what the content
//! store hands out. Source-side ids (`PostOldId`, `CommentOldId`, ...) are what
//! an archive carries; they mean nothing on the destination until remapped.
//! Keeping the two apart in the type system is what stops a raw archive id
//! from being written into the store by accident.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Get the raw numeric value
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }
    };
}

numeric_id!(
    /// Post id on the destination (modules, pages and attachments are all posts)
    PostId
);
numeric_id!(
    /// Comment id on the destination
    CommentId
);
numeric_id!(
    /// Term id on the destination
    TermId
);
numeric_id!(
    /// User id on the destination
    UserId
);
numeric_id!(
    /// Post id as recorded in an archive
    PostOldId
);
numeric_id!(
    /// Comment id as recorded in an archive
    CommentOldId
);

impl From<PostId> for PostOldId {
    fn from(id: PostId) -> Self {
        PostOldId(id.0)
    }
}

impl From<CommentId> for CommentOldId {
    fn from(id: CommentId) -> Self {
        CommentOldId(id.0)
    }
}

/// Identity of a term across systems: taxonomy plus slug
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TermFingerprint {
    pub taxonomy: String,
    pub slug: String,
}

impl TermFingerprint {
    pub fn new(taxonomy: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            taxonomy: taxonomy.into(),
            slug: slug.into(),
        }
    }
}

impl fmt::Display for TermFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.taxonomy, self.slug)
    }
}

/// How an archive refers to a user: numeric id on comments, login on items
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserKey {
    Id(u64),
    Login(String),
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::Id(id) => write!(f, "#{}", id),
            UserKey::Login(login) => write!(f, "{}", login),
        }
    }
}

/// Kind of content entity carried by an archive item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Module,
    Page,
    Attachment,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Page => "page",
            Self::Attachment => "attachment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "module" => Some(Self::Module),
            "page" => Some(Self::Page),
            "attachment" => Some(Self::Attachment),
            _ => None,
        }
    }
}

impl fmt::Display for PostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_kind_parse() {
        assert_eq!(PostKind::parse("module"), Some(PostKind::Module));
        assert_eq!(PostKind::parse("attachment"), Some(PostKind::Attachment));
        assert_eq!(PostKind::parse("revision"), None);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&PostId(42)).unwrap();
        assert_eq!(json, "42");
        let id: CommentOldId = serde_json::from_str("7").unwrap();
        assert_eq!(id, CommentOldId(7));
    }

    #[test]
    fn test_term_fingerprint_display() {
        let fp = TermFingerprint::new("category", "intro");
        assert_eq!(fp.to_string(), "category:intro");
    }
}
