//! "Does this already exist?" cache for one import run
//!
//! Fingerprints are xxh3 hashes of the identifying fields of each entity:
//! guid for posts, author name plus timestamp for comments, taxonomy plus
//! slug for terms, login for users. The cache is either filled up front from
//! [`ContentStore::fingerprints`] or consulted lazily, falling back to the
//! store's lookup methods on a miss.

use crate::store::{ContentStore, StoreError};
use crate::types::{CommentId, PostId, TermFingerprint, TermId, UserId};
use crate::util::fingerprint_hash;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// How the index is populated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Load all fingerprints from the store before the run
    Prefetch,
    /// Ask the store on first lookup of each fingerprint
    Lazy,
}

/// Fingerprint of a post
pub fn post_fingerprint(guid: &str) -> u64 {
    fingerprint_hash(&["post", guid])
}

/// Fingerprint of a comment
pub fn comment_fingerprint(author_name: &str, date: DateTime<Utc>) -> u64 {
    fingerprint_hash(&["comment", author_name, &date.timestamp().to_string()])
}

/// Fingerprint of a term
pub fn term_fingerprint(term: &TermFingerprint) -> u64 {
    fingerprint_hash(&["term", &term.taxonomy, &term.slug])
}

/// Fingerprint of a user
pub fn user_fingerprint(login: &str) -> u64 {
    fingerprint_hash(&["user", login])
}

/// Per-run existence cache
#[derive(Debug)]
pub struct ExistenceIndex {
    mode: IndexMode,
    posts: HashMap<u64, PostId>,
    comments: HashMap<u64, CommentId>,
    terms: HashMap<u64, TermId>,
    users: HashMap<u64, UserId>,
}

impl ExistenceIndex {
    /// Empty lazy index
    pub fn lazy() -> Self {
        Self {
            mode: IndexMode::Lazy,
            posts: HashMap::new(),
            comments: HashMap::new(),
            terms: HashMap::new(),
            users: HashMap::new(),
        }
    }

    /// Index filled with every identity the store holds
    pub fn prefetch<S: ContentStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let fp = store.fingerprints()?;
        let mut index = Self::lazy();
        index.mode = IndexMode::Prefetch;

        for (guid, id) in &fp.posts {
            index.posts.insert(post_fingerprint(guid), *id);
        }
        for (author, date, id) in &fp.comments {
            index.comments.insert(comment_fingerprint(author, *date), *id);
        }
        for (taxonomy, slug, id) in &fp.terms {
            index
                .terms
                .insert(term_fingerprint(&TermFingerprint::new(taxonomy, slug)), *id);
        }
        for (login, id) in &fp.users {
            index.users.insert(user_fingerprint(login), *id);
        }

        debug!(
            "Prefetched {} posts, {} comments, {} terms, {} users",
            index.posts.len(),
            index.comments.len(),
            index.terms.len(),
            index.users.len()
        );
        Ok(index)
    }

    /// Build an index in the given mode
    pub fn build<S: ContentStore + ?Sized>(mode: IndexMode, store: &S) -> Result<Self, StoreError> {
        match mode {
            IndexMode::Prefetch => Self::prefetch(store),
            IndexMode::Lazy => Ok(Self::lazy()),
        }
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    pub fn post<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        guid: &str,
    ) -> Result<Option<PostId>, StoreError> {
        if guid.is_empty() {
            return Ok(None);
        }
        let key = post_fingerprint(guid);
        if let Some(id) = self.posts.get(&key) {
            return Ok(Some(*id));
        }
        if self.mode == IndexMode::Lazy {
            if let Some(id) = store.find_post_by_guid(guid)? {
                self.posts.insert(key, id);
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    pub fn comment<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        author_name: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<CommentId>, StoreError> {
        let key = comment_fingerprint(author_name, date);
        if let Some(id) = self.comments.get(&key) {
            return Ok(Some(*id));
        }
        if self.mode == IndexMode::Lazy {
            if let Some(id) = store.find_comment(author_name, date)? {
                self.comments.insert(key, id);
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    pub fn term<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        term: &TermFingerprint,
    ) -> Result<Option<TermId>, StoreError> {
        let key = term_fingerprint(term);
        if let Some(id) = self.terms.get(&key) {
            return Ok(Some(*id));
        }
        if self.mode == IndexMode::Lazy {
            if let Some(id) = store.find_term(term)? {
                self.terms.insert(key, id);
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    pub fn user<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        login: &str,
    ) -> Result<Option<UserId>, StoreError> {
        let key = user_fingerprint(login);
        if let Some(id) = self.users.get(&key) {
            return Ok(Some(*id));
        }
        if self.mode == IndexMode::Lazy {
            if let Some(id) = store.find_user_by_login(login)? {
                self.users.insert(key, id);
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Record a post created during this run
    pub fn mark_post(&mut self, guid: &str, id: PostId) {
        if !guid.is_empty() {
            self.posts.entry(post_fingerprint(guid)).or_insert(id);
        }
    }

    pub fn mark_comment(&mut self, author_name: &str, date: DateTime<Utc>, id: CommentId) {
        self.comments
            .entry(comment_fingerprint(author_name, date))
            .or_insert(id);
    }

    pub fn mark_term(&mut self, term: &TermFingerprint, id: TermId) {
        self.terms.entry(term_fingerprint(term)).or_insert(id);
    }

    pub fn mark_user(&mut self, login: &str, id: UserId) {
        self.users.entry(user_fingerprint(login)).or_insert(id);
    }
}
