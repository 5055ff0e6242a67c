//! In-memory content store persisted as a JSON snapshot

use super::model::{
    Comment, DerivedSize, NewComment, NewPost, NewTerm, NewUser, Post, SiteInfo, SizeEntry,
    StoreFingerprints, Term, User, META_ATTACHMENT_SIZES,
};
use super::{ContentStore, StoreError};
use crate::types::{CommentId, PostId, PostKind, TermFingerprint, TermId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Image extensions for which derived sizes are generated
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Serialized form of the store
#[derive(Serialize, Deserialize)]
struct SavedStore {
    site: SiteInfo,
    posts: Vec<Post>,
    comments: Vec<Comment>,
    terms: Vec<Term>,
    users: Vec<User>,
    next_id: u64,
}

/// Content store backed by in-memory maps, optionally saved to a JSON file
pub struct MemoryStore {
    site: SiteInfo,
    posts: BTreeMap<PostId, Post>,
    comments: BTreeMap<CommentId, Comment>,
    terms: BTreeMap<TermId, Term>,
    users: BTreeMap<UserId, User>,
    /// Next id handed out for any entity kind
    next_id: u64,
    /// Directory holding media files, mirrored by `site.uploads_url`
    media_root: PathBuf,
    /// Derived image sizes generated for new attachments
    image_sizes: Vec<(u32, u32)>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(site: SiteInfo, media_root: impl AsRef<Path>) -> Self {
        Self {
            site,
            posts: BTreeMap::new(),
            comments: BTreeMap::new(),
            terms: BTreeMap::new(),
            users: BTreeMap::new(),
            next_id: 1,
            media_root: media_root.as_ref().to_path_buf(),
            image_sizes: vec![(150, 150), (300, 200)],
        }
    }

    /// Start handing out ids from `next_id`
    pub fn with_next_id(mut self, next_id: u64) -> Self {
        self.next_id = next_id.max(1);
        self
    }

    /// Set the derived image sizes generated for new attachments
    pub fn with_image_sizes(mut self, sizes: Vec<(u32, u32)>) -> Self {
        self.image_sizes = sizes;
        self
    }

    /// Load a store snapshot, or start empty with `site` if the file is absent
    pub fn load(
        path: impl AsRef<Path>,
        site: SiteInfo,
        media_root: impl AsRef<Path>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut store = Self::new(site, media_root);

        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let saved: SavedStore = serde_json::from_str(&data)?;
            store.site = saved.site;
            store.next_id = saved.next_id.max(1);
            store.posts = saved.posts.into_iter().map(|p| (p.id, p)).collect();
            store.comments = saved.comments.into_iter().map(|c| (c.id, c)).collect();
            store.terms = saved.terms.into_iter().map(|t| (t.id, t)).collect();
            store.users = saved.users.into_iter().map(|u| (u.id, u)).collect();
            info!(
                "Loaded store from {}: {} posts, {} comments, {} terms, {} users",
                path.display(),
                store.posts.len(),
                store.comments.len(),
                store.terms.len(),
                store.users.len()
            );
        }

        Ok(store)
    }

    /// Save the store snapshot, replacing the file atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let saved = SavedStore {
            site: self.site.clone(),
            posts: self.posts.values().cloned().collect(),
            comments: self.comments.values().cloned().collect(),
            terms: self.terms.values().cloned().collect(),
            users: self.users.values().cloned().collect(),
            next_id: self.next_id,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&saved)?)?;
        std::fs::rename(&tmp, path)?;
        debug!("Saved store to {}", path.display());
        Ok(())
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Insert a fully-formed post, keeping its id
    pub fn add_post(&mut self, post: Post) {
        self.next_id = self.next_id.max(post.id.0 + 1);
        self.posts.insert(post.id, post);
    }

    /// Insert a fully-formed comment, keeping its id
    pub fn add_comment(&mut self, comment: Comment) {
        self.next_id = self.next_id.max(comment.id.0 + 1);
        self.comments.insert(comment.id, comment);
    }

    /// Insert a fully-formed term, keeping its id
    pub fn add_term(&mut self, term: Term) {
        self.next_id = self.next_id.max(term.id.0 + 1);
        self.terms.insert(term.id, term);
    }

    /// Insert a fully-formed user, keeping its id
    pub fn add_user(&mut self, user: User) {
        self.next_id = self.next_id.max(user.id.0 + 1);
        self.users.insert(user.id, user);
    }

    pub fn all_posts(&self) -> impl Iterator<Item = &Post> {
        self.posts.values()
    }

    pub fn all_comments(&self) -> impl Iterator<Item = &Comment> {
        self.comments.values()
    }

    pub fn all_terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.values()
    }

    pub fn all_users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    fn post_mut(&mut self, id: PostId) -> Result<&mut Post, StoreError> {
        self.posts
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "post", id: id.0 })
    }

    fn comment_mut(&mut self, id: CommentId) -> Result<&mut Comment, StoreError> {
        self.comments
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "comment", id: id.0 })
    }

    /// Path of a media file relative to the uploads URL
    fn relative_media_path(&self, url: &str) -> Option<String> {
        let base = self.site.uploads_url.trim_end_matches('/');
        url.strip_prefix(base)
            .map(|rest| rest.trim_start_matches('/').to_string())
    }

    /// Pick a relative path that does not collide with an existing file
    fn unique_relative_path(&self, relative_path: &str) -> String {
        if !self.media_root.join(relative_path).exists() {
            return relative_path.to_string();
        }
        let path = Path::new(relative_path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty());

        let mut n = 1;
        loop {
            let name = format!("{}-{}{}", stem, n, ext);
            let candidate = match &dir {
                Some(d) => format!("{}/{}", d, name),
                None => name,
            };
            if !self.media_root.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl ContentStore for MemoryStore {
    fn site_info(&self) -> SiteInfo {
        self.site.clone()
    }

    fn post(&self, id: PostId) -> Result<Option<Post>, StoreError> {
        Ok(self.posts.get(&id).cloned())
    }

    fn posts(&self, ids: &[PostId]) -> Result<Vec<Post>, StoreError> {
        Ok(ids.iter().filter_map(|id| self.posts.get(id).cloned()).collect())
    }

    fn comments_for_post(&self, id: PostId) -> Result<Vec<Comment>, StoreError> {
        Ok(self
            .comments
            .values()
            .filter(|c| c.post == id)
            .cloned()
            .collect())
    }

    fn term(&self, id: TermId) -> Result<Option<Term>, StoreError> {
        Ok(self.terms.get(&id).cloned())
    }

    fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).cloned())
    }

    fn attachment_by_url(&self, url: &str) -> Result<Option<PostId>, StoreError> {
        Ok(self
            .posts
            .values()
            .find(|p| p.kind == PostKind::Attachment && p.attachment_url.as_deref() == Some(url))
            .map(|p| p.id))
    }

    fn attachments_by_basename(&self, file_name: &str) -> Result<Vec<PostId>, StoreError> {
        Ok(self
            .posts
            .values()
            .filter(|p| p.kind == PostKind::Attachment)
            .filter(|p| {
                p.attachment_url
                    .as_deref()
                    .and_then(|u| u.rsplit('/').next())
                    .is_some_and(|name| name == file_name)
            })
            .map(|p| p.id)
            .collect())
    }

    fn attachment_file(&self, id: PostId) -> Result<Option<PathBuf>, StoreError> {
        let Some(url) = self.posts.get(&id).and_then(|p| p.attachment_url.clone()) else {
            return Ok(None);
        };
        Ok(self
            .relative_media_path(&url)
            .map(|rel| self.media_root.join(rel))
            .filter(|path| path.is_file()))
    }

    fn find_post_by_guid(&self, guid: &str) -> Result<Option<PostId>, StoreError> {
        Ok(self.posts.values().find(|p| p.guid == guid).map(|p| p.id))
    }

    fn find_comment(
        &self,
        author_name: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<CommentId>, StoreError> {
        Ok(self
            .comments
            .values()
            .find(|c| c.author_name == author_name && c.date == date)
            .map(|c| c.id))
    }

    fn find_term(&self, fingerprint: &TermFingerprint) -> Result<Option<TermId>, StoreError> {
        Ok(self
            .terms
            .values()
            .find(|t| t.taxonomy == fingerprint.taxonomy && t.slug == fingerprint.slug)
            .map(|t| t.id))
    }

    fn find_user_by_login(&self, login: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.users.values().find(|u| u.login == login).map(|u| u.id))
    }

    fn fingerprints(&self) -> Result<StoreFingerprints, StoreError> {
        Ok(StoreFingerprints {
            posts: self.posts.values().map(|p| (p.guid.clone(), p.id)).collect(),
            comments: self
                .comments
                .values()
                .map(|c| (c.author_name.clone(), c.date, c.id))
                .collect(),
            terms: self
                .terms
                .values()
                .map(|t| (t.taxonomy.clone(), t.slug.clone(), t.id))
                .collect(),
            users: self.users.values().map(|u| (u.login.clone(), u.id)).collect(),
        })
    }

    fn insert_post(&mut self, post: NewPost) -> Result<PostId, StoreError> {
        if post.kind != PostKind::Attachment
            && post.title.trim().is_empty()
            && post.content.trim().is_empty()
            && post.excerpt.trim().is_empty()
        {
            return Err(StoreError::Rejected(
                "content, title, and excerpt are empty".to_string(),
            ));
        }
        if let Some(parent) = post.parent {
            if !self.posts.contains_key(&parent) {
                return Err(StoreError::NotFound { kind: "post", id: parent.0 });
            }
        }

        let id = PostId(self.allocate_id());
        let guid = if post.guid.is_empty() {
            format!("{}/?p={}", self.site.url.trim_end_matches('/'), id)
        } else {
            post.guid
        };
        self.posts.insert(
            id,
            Post {
                id,
                kind: post.kind,
                guid,
                title: post.title,
                content: post.content,
                excerpt: post.excerpt,
                slug: post.slug,
                status: post.status,
                parent: post.parent,
                author: post.author,
                date: post.date,
                modified: post.modified,
                menu_order: post.menu_order,
                attachment_url: None,
                meta: BTreeMap::new(),
                terms: post.terms,
            },
        );
        Ok(id)
    }

    fn insert_attachment(
        &mut self,
        post: NewPost,
        file: &Path,
        relative_path: &str,
    ) -> Result<(PostId, String), StoreError> {
        let relative_path = self.unique_relative_path(relative_path.trim_start_matches('/'));
        let dest = self.media_root.join(&relative_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(file, &dest)?;

        let id = match self.insert_post(post) {
            Ok(id) => id,
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_file(&dest) {
                    warn!("Failed to remove {}: {}", dest.display(), cleanup);
                }
                return Err(e);
            }
        };
        let url = format!("{}/{}", self.site.uploads_url.trim_end_matches('/'), relative_path);
        self.post_mut(id)?.attachment_url = Some(url.clone());
        Ok((id, url))
    }

    fn generate_derived_sizes(&mut self, id: PostId) -> Result<Vec<DerivedSize>, StoreError> {
        let url = self
            .posts
            .get(&id)
            .and_then(|p| p.attachment_url.clone())
            .ok_or(StoreError::NotFound { kind: "attachment", id: id.0 })?;
        let Some(original) = self.attachment_file(id)? else {
            return Ok(Vec::new());
        };

        let ext = original
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(Vec::new());
        }
        let stem = original
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let url_dir = url.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(&url).to_string();

        let mut sizes = Vec::with_capacity(self.image_sizes.len());
        let mut entries = Vec::with_capacity(self.image_sizes.len());
        for &(width, height) in &self.image_sizes {
            let file = format!("{}-{}x{}.{}", stem, width, height, ext);
            // No image codec here: the variant is a copy of the original bytes
            std::fs::copy(&original, original.with_file_name(&file))?;
            sizes.push(DerivedSize {
                width,
                height,
                url: format!("{}/{}", url_dir, file),
            });
            entries.push(SizeEntry { width, height, file });
        }

        let json = serde_json::to_string(&entries)?;
        self.post_mut(id)?
            .meta
            .insert(META_ATTACHMENT_SIZES.to_string(), json);
        Ok(sizes)
    }

    fn insert_comment(&mut self, comment: NewComment) -> Result<CommentId, StoreError> {
        if !self.posts.contains_key(&comment.post) {
            return Err(StoreError::NotFound { kind: "post", id: comment.post.0 });
        }
        let id = CommentId(self.allocate_id());
        self.comments.insert(
            id,
            Comment {
                id,
                post: comment.post,
                author_name: comment.author_name,
                author_email: comment.author_email,
                author_url: comment.author_url,
                date: comment.date,
                content: comment.content,
                approved: comment.approved,
                comment_type: comment.comment_type,
                parent: comment.parent,
                user: comment.user,
                meta: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn insert_term(&mut self, term: NewTerm) -> Result<TermId, StoreError> {
        if term.slug.trim().is_empty() {
            return Err(StoreError::Rejected("term slug is empty".to_string()));
        }
        let fingerprint = TermFingerprint::new(&term.taxonomy, &term.slug);
        if self.find_term(&fingerprint)?.is_some() {
            return Err(StoreError::Rejected(format!("term {} already exists", fingerprint)));
        }
        let id = TermId(self.allocate_id());
        self.terms.insert(
            id,
            Term {
                id,
                taxonomy: term.taxonomy,
                slug: term.slug,
                name: term.name,
                description: term.description,
                parent: term.parent,
            },
        );
        Ok(id)
    }

    fn insert_user(&mut self, user: NewUser) -> Result<UserId, StoreError> {
        if user.login.trim().is_empty() {
            return Err(StoreError::Rejected("user login is empty".to_string()));
        }
        if self.find_user_by_login(&user.login)?.is_some() {
            return Err(StoreError::Rejected(format!("login {} already exists", user.login)));
        }
        let id = UserId(self.allocate_id());
        self.users.insert(
            id,
            User {
                id,
                login: user.login,
                email: user.email,
                display_name: user.display_name,
                first_name: user.first_name,
                last_name: user.last_name,
            },
        );
        Ok(id)
    }

    fn set_post_meta(&mut self, id: PostId, key: &str, value: &str) -> Result<(), StoreError> {
        self.post_mut(id)?
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_post_meta(&mut self, id: PostId, key: &str) -> Result<bool, StoreError> {
        Ok(self.post_mut(id)?.meta.remove(key).is_some())
    }

    fn delete_post_meta_by_key(&mut self, key: &str) -> Result<usize, StoreError> {
        Ok(self
            .posts
            .values_mut()
            .filter_map(|p| p.meta.remove(key))
            .count())
    }

    fn update_post_parent(&mut self, id: PostId, parent: PostId) -> Result<(), StoreError> {
        if !self.posts.contains_key(&parent) {
            return Err(StoreError::NotFound { kind: "post", id: parent.0 });
        }
        self.post_mut(id)?.parent = Some(parent);
        Ok(())
    }

    fn update_post_author(&mut self, id: PostId, author: UserId) -> Result<(), StoreError> {
        self.post_mut(id)?.author = Some(author);
        Ok(())
    }

    fn update_post_content(&mut self, id: PostId, content: &str) -> Result<(), StoreError> {
        let post = self.post_mut(id)?;
        post.content = content.to_string();
        post.modified = Utc::now();
        Ok(())
    }

    fn set_comment_meta(
        &mut self,
        id: CommentId,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.comment_mut(id)?
            .meta
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn update_comment_parent(
        &mut self,
        id: CommentId,
        parent: CommentId,
    ) -> Result<(), StoreError> {
        self.comment_mut(id)?.parent = Some(parent);
        Ok(())
    }

    fn update_comment_user(&mut self, id: CommentId, user: UserId) -> Result<(), StoreError> {
        self.comment_mut(id)?.user = Some(user);
        Ok(())
    }

    fn update_term_parent(&mut self, id: TermId, parent: TermId) -> Result<(), StoreError> {
        self.terms
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "term", id: id.0 })?
            .parent = Some(parent);
        Ok(())
    }
}
