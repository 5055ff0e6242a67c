//! Old-to-new identity maps for one import run

use crate::types::{
    CommentId, CommentOldId, PostId, PostOldId, TermFingerprint, TermId, UserId, UserKey,
};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::warn;

/// Outcome of recording a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// New mapping recorded
    Added,
    /// Same mapping already present
    Unchanged,
    /// A different target is already mapped; the table was not changed
    Conflict,
}

fn insert_once<K, V>(map: &mut HashMap<K, V>, key: K, value: V, what: &str) -> Insert
where
    K: Eq + Hash + std::fmt::Display,
    V: PartialEq + Copy + std::fmt::Display,
{
    match map.get(&key) {
        Some(existing) if *existing == value => Insert::Unchanged,
        Some(existing) => {
            warn!(
                "Refusing to remap {} {} to {}: already mapped to {}",
                what, key, value, existing
            );
            Insert::Conflict
        }
        None => {
            map.insert(key, value);
            Insert::Added
        }
    }
}

/// Append-only identity maps.
///
/// Once an old key is mapped it keeps that target for the rest of the run.
#[derive(Debug, Default)]
pub struct RemapTable {
    posts: HashMap<PostOldId, PostId>,
    comments: HashMap<CommentOldId, CommentId>,
    terms: HashMap<TermFingerprint, TermId>,
    users: HashMap<UserKey, UserId>,
    /// Source attachment URL to destination URL, including derived sizes
    urls: HashMap<String, String>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_post(&mut self, old: PostOldId, new: PostId) -> Insert {
        insert_once(&mut self.posts, old, new, "post")
    }

    pub fn map_comment(&mut self, old: CommentOldId, new: CommentId) -> Insert {
        insert_once(&mut self.comments, old, new, "comment")
    }

    pub fn map_term(&mut self, old: TermFingerprint, new: TermId) -> Insert {
        insert_once(&mut self.terms, old, new, "term")
    }

    pub fn map_user(&mut self, old: UserKey, new: UserId) -> Insert {
        insert_once(&mut self.users, old, new, "user")
    }

    /// Record an attachment URL mapping. Identical source and target URLs are ignored.
    pub fn map_url(&mut self, old: impl Into<String>, new: impl Into<String>) -> Insert {
        let (old, new) = (old.into(), new.into());
        if old == new {
            return Insert::Unchanged;
        }
        match self.urls.get(&old) {
            Some(existing) if *existing == new => Insert::Unchanged,
            Some(existing) => {
                warn!(
                    "Refusing to remap URL {} to {}: already mapped to {}",
                    old, new, existing
                );
                Insert::Conflict
            }
            None => {
                self.urls.insert(old, new);
                Insert::Added
            }
        }
    }

    pub fn post(&self, old: PostOldId) -> Option<PostId> {
        self.posts.get(&old).copied()
    }

    pub fn comment(&self, old: CommentOldId) -> Option<CommentId> {
        self.comments.get(&old).copied()
    }

    pub fn term(&self, old: &TermFingerprint) -> Option<TermId> {
        self.terms.get(old).copied()
    }

    pub fn user(&self, old: &UserKey) -> Option<UserId> {
        self.users.get(old).copied()
    }

    pub fn url(&self, old: &str) -> Option<&str> {
        self.urls.get(old).map(String::as_str)
    }

    /// Every mapped post pair
    pub fn post_pairs(&self) -> impl Iterator<Item = (PostOldId, PostId)> + '_ {
        self.posts.iter().map(|(o, n)| (*o, *n))
    }

    /// URL pairs ordered longest source URL first, so that a URL is never
    /// rewritten through a shorter URL it contains
    pub fn urls_longest_first(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .urls
            .iter()
            .map(|(o, n)| (o.as_str(), n.as_str()))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        pairs
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    pub fn url_count(&self) -> usize {
        self.urls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mappings_are_append_only() {
        let mut table = RemapTable::new();
        assert_eq!(table.map_post(PostOldId(10), PostId(55)), Insert::Added);
        assert_eq!(table.map_post(PostOldId(10), PostId(55)), Insert::Unchanged);
        assert_eq!(table.map_post(PostOldId(10), PostId(99)), Insert::Conflict);
        assert_eq!(table.post(PostOldId(10)), Some(PostId(55)));
        assert_eq!(table.post(PostOldId(11)), None);
    }

    #[test]
    fn test_user_keys_are_distinct() {
        let mut table = RemapTable::new();
        table.map_user(UserKey::Id(3), UserId(40));
        table.map_user(UserKey::Login("ada".to_string()), UserId(40));
        assert_eq!(table.user(&UserKey::Id(3)), Some(UserId(40)));
        assert_eq!(table.user(&UserKey::Login("3".to_string())), None);
    }

    #[test]
    fn test_urls_longest_first() {
        let mut table = RemapTable::new();
        table.map_url("http://old/u/a.jpg", "http://new/u/a.jpg");
        table.map_url("http://old/u/a.jpg-300x200.jpg", "http://new/u/a-300x200.jpg");
        table.map_url("http://old/u/b.jpg", "http://old/u/b.jpg");

        let pairs = table.urls_longest_first();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "http://old/u/a.jpg-300x200.jpg");
        assert_eq!(pairs[1].0, "http://old/u/a.jpg");
    }
}
