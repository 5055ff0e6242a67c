//! Import coordinator that turns decoded records into store entities
//!
//! Records are handled one at a time in document order. For each one the
//! coordinator checks whether it already exists on the destination, resolves
//! its references through the [`RemapTable`], creates it through the store's
//! allow-listed insert structs and records the new identity. References that
//! cannot be resolved yet become [`DeferredFixup`]s for the post-processing
//! pass. A failing record is logged, counted and skipped.

use super::existence::{ExistenceIndex, IndexMode};
use super::fixup::DeferredFixup;
use super::media::{derived_url_mappings, HttpFetcher, MediaFetcher, MediaResolver};
use super::progress::{ImportStage, ProgressReporter};
use super::remap::RemapTable;
use super::types::{ImportError, ImportStats};
use crate::archive::{
    check_version, ArchiveHeader, AuthorRecord, CommentRecord, ItemRecord, Record, TermRecord,
    TermRef, VersionSupport, FORMAT_VERSION,
};
use crate::config::ImportConfig;
use crate::store::{
    ContentStore, DerivedSize, NewComment, NewPost, NewTerm, NewUser, SizeEntry,
    META_ATTACHMENT_SHA256, META_ATTACHMENT_SIZES, META_THUMBNAIL_ID,
};
use crate::types::{PostId, PostKind, PostOldId, TermFingerprint, TermId, UserId, UserKey};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Meta key recording the source id of every post created by a run
pub const META_IMPORT_SOURCE_ID: &str = "_import_source_id";

/// Meta key holding a module's source page list while some of its pages are
/// still waiting for a later run
pub const META_PENDING_PAGES: &str = "_import_pending_pages";

/// Meta key holding the source ids a post's content still refers to after a
/// truncated run
pub const META_PENDING_REFS: &str = "_import_pending_refs";

/// What happened to one record.
///
/// Every record starts pending and ends in exactly one of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Matched an entity already on the destination
    ExistsAlready,
    /// Created with every reference resolved
    Created,
    /// Created, with at least one relationship left for post-processing
    CreatedDeferred,
    /// Informational record (the header); nothing to create
    Noted,
}

/// A post created by this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportedPost {
    pub id: PostId,
    pub old_id: PostOldId,
    pub kind: PostKind,
}

/// Everything the post-processing pass needs from the main pass
#[derive(Debug)]
pub struct CoordinatorOutput {
    pub header: Option<ArchiveHeader>,
    pub remap: RemapTable,
    pub fixups: Vec<DeferredFixup>,
    pub created: Vec<ImportedPost>,
    /// Existing modules whose page list an earlier, truncated run left unfinished
    pub pending_modules: Vec<PostId>,
    pub stats: ImportStats,
    /// Whether the record limit stopped the run early
    pub truncated: bool,
}

/// Meta keys that describe source-side storage and are never copied
const SOURCE_ONLY_META: &[&str] = &[
    META_IMPORT_SOURCE_ID,
    META_PENDING_PAGES,
    META_PENDING_REFS,
    META_ATTACHMENT_SIZES,
    META_ATTACHMENT_SHA256,
];

/// Import coordinator for one run against one store
pub struct ImportCoordinator<'a, S: ContentStore + ?Sized> {
    store: &'a mut S,
    reporter: &'a ProgressReporter,
    config: ImportConfig,
    remap: RemapTable,
    existence: ExistenceIndex,
    fixups: Vec<DeferredFixup>,
    media: MediaResolver,
    header: Option<ArchiveHeader>,
    created: Vec<ImportedPost>,
    pending_modules: Vec<PostId>,
    stats: ImportStats,
    items_seen: usize,
}

impl<'a, S: ContentStore + ?Sized> ImportCoordinator<'a, S> {
    /// Import every record from `records`.
    ///
    /// Fatal errors (I/O, XML syntax) abort the run; anything else fails only
    /// the record it came from.
    pub fn import<I>(mut self, records: I) -> Result<CoordinatorOutput, ImportError>
    where
        I: IntoIterator<Item = Result<Record, ImportError>>,
    {
        let mut truncated = false;

        for result in records {
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.stats.records_failed += 1;
                    self.reporter.error(format!("Skipping unreadable record: {}", e));
                    continue;
                }
            };

            if let Record::Item(_) = record {
                if let Some(max) = self.config.max_records {
                    if self.items_seen >= max {
                        self.reporter
                            .info(format!("Reached record limit of {}, stopping", max));
                        truncated = true;
                        break;
                    }
                }
                self.items_seen += 1;
            }

            self.stats.records_processed += 1;
            let label = record.label();
            let is_item = matches!(record, Record::Item(_));

            match self.process(record) {
                Ok(outcome) => {
                    self.reporter.debug(format!("{}: {:?}", label, outcome));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.stats.records_failed += 1;
                    self.reporter.error(format!("Failed to import {}: {}", label, e));
                }
            }

            if is_item {
                self.reporter.progress(ImportStage::Importing, &self.stats);
            }
        }

        Ok(CoordinatorOutput {
            header: self.header,
            remap: self.remap,
            fixups: self.fixups,
            created: self.created,
            pending_modules: self.pending_modules,
            stats: self.stats,
            truncated,
        })
    }

    /// Handle one record
    pub fn process(&mut self, record: Record) -> Result<RecordOutcome, ImportError> {
        match record {
            Record::Header(header) => Ok(self.handle_header(header)),
            Record::Author(author) => self.handle_author(author),
            Record::Term(term) => self.handle_term(term),
            Record::Item(item) => self.handle_item(*item),
        }
    }

    fn default_author(&self) -> Option<UserId> {
        self.config.default_author.map(UserId)
    }

    fn handle_header(&mut self, header: ArchiveHeader) -> RecordOutcome {
        match check_version(&header.format_version) {
            VersionSupport::Supported => {}
            VersionSupport::Newer => self.reporter.warn(format!(
                "Archive format version '{}' is newer than supported version {}; continuing",
                header.format_version, FORMAT_VERSION
            )),
            VersionSupport::Unknown => self.reporter.warn(format!(
                "Archive declares no format version; reading it as version {}",
                FORMAT_VERSION
            )),
        }
        self.reporter.info(format!(
            "Importing content exported from {} ({})",
            header.site_title, header.site_url
        ));
        self.media.set_source_uploads_url(header.uploads_url.clone());
        self.header = Some(header);
        RecordOutcome::Noted
    }

    fn handle_author(&mut self, author: AuthorRecord) -> Result<RecordOutcome, ImportError> {
        let login_key = UserKey::Login(author.login.clone());
        let id_key = (author.id != 0).then_some(UserKey::Id(author.id));

        if let Some(existing) = self.existence.user(&*self.store, &author.login)? {
            self.map_user_keys(login_key, id_key, existing);
            self.stats.users_existing += 1;
            self.reporter
                .info(format!("User {} already exists as {}", author.login, existing));
            return Ok(RecordOutcome::ExistsAlready);
        }

        if !self.config.create_users {
            if let Some(fallback) = self.default_author() {
                self.map_user_keys(login_key, id_key, fallback);
                self.reporter.debug(format!(
                    "Mapping author {} to default author {}",
                    author.login, fallback
                ));
            }
            return Ok(RecordOutcome::Noted);
        }

        let id = self.store.insert_user(NewUser {
            login: author.login.clone(),
            email: author.email,
            display_name: author.display_name,
            first_name: author.first_name,
            last_name: author.last_name,
        })?;
        self.existence.mark_user(&author.login, id);
        self.map_user_keys(login_key, id_key, id);
        self.stats.users_created += 1;
        Ok(RecordOutcome::Created)
    }

    fn map_user_keys(&mut self, login: UserKey, id: Option<UserKey>, user: UserId) {
        self.remap.map_user(login, user);
        if let Some(id) = id {
            self.remap.map_user(id, user);
        }
    }

    fn handle_term(&mut self, term: TermRecord) -> Result<RecordOutcome, ImportError> {
        let fingerprint = TermFingerprint::new(&term.taxonomy, &term.slug);

        if let Some(existing) = self.existence.term(&*self.store, &fingerprint)? {
            self.remap.map_term(fingerprint, existing);
            self.stats.terms_existing += 1;
            self.reporter
                .info(format!("Term {}:{} already exists", term.taxonomy, term.slug));
            return Ok(RecordOutcome::ExistsAlready);
        }

        let parent_fp = term
            .parent_slug
            .as_ref()
            .map(|slug| TermFingerprint::new(&term.taxonomy, slug));
        let parent = parent_fp.as_ref().and_then(|fp| self.remap.term(fp));

        let id = self.store.insert_term(NewTerm {
            taxonomy: term.taxonomy.clone(),
            slug: term.slug.clone(),
            name: term.name,
            description: term.description,
            parent,
        })?;
        self.existence.mark_term(&fingerprint, id);
        self.remap.map_term(fingerprint, id);
        self.stats.terms_created += 1;

        match (parent_fp, parent) {
            (Some(parent), None) => {
                self.fixups.push(DeferredFixup::TermParent { term: id, parent });
                Ok(RecordOutcome::CreatedDeferred)
            }
            _ => Ok(RecordOutcome::Created),
        }
    }

    /// Term id for an item's term reference, creating the term when neither
    /// the run nor the store knows it
    fn resolve_term_ref(&mut self, term_ref: &TermRef) -> Result<TermId, ImportError> {
        let fingerprint = TermFingerprint::new(&term_ref.taxonomy, &term_ref.slug);
        if let Some(id) = self.remap.term(&fingerprint) {
            return Ok(id);
        }
        if let Some(id) = self.existence.term(&*self.store, &fingerprint)? {
            self.remap.map_term(fingerprint, id);
            return Ok(id);
        }

        let id = self.store.insert_term(NewTerm {
            taxonomy: term_ref.taxonomy.clone(),
            slug: term_ref.slug.clone(),
            name: term_ref.name.clone(),
            description: String::new(),
            parent: None,
        })?;
        self.reporter
            .debug(format!("Created term {} referenced by an item", fingerprint));
        self.existence.mark_term(&fingerprint, id);
        self.remap.map_term(fingerprint, id);
        self.stats.terms_created += 1;
        Ok(id)
    }

    fn handle_item(&mut self, item: ItemRecord) -> Result<RecordOutcome, ImportError> {
        if let Some(existing) = self.existence.post(&*self.store, &item.guid)? {
            self.remap.map_post(item.id, existing);
            match item.kind {
                PostKind::Attachment => self.map_existing_attachment(&item, existing)?,
                PostKind::Module | PostKind::Page => {
                    let stored = self.store.post(existing)?;
                    let has = |key: &str| stored.as_ref().is_some_and(|p| p.meta(key).is_some());
                    if item.kind == PostKind::Module && has(META_PENDING_PAGES) {
                        self.pending_modules.push(existing);
                    }
                    if has(META_PENDING_REFS) {
                        self.fixups
                            .push(DeferredFixup::ContentReferences { post: existing });
                    }
                }
            }
            self.stats.posts_existing += 1;
            self.reporter.info(format!(
                "{} \"{}\" already exists as {}",
                item.kind, item.title, existing
            ));
            // Comments are still checked so new discussion is picked up
            self.import_comments(&item, existing)?;
            return Ok(RecordOutcome::ExistsAlready);
        }

        let fixups_before = self.fixups.len();

        let parent = item.parent.and_then(|old| self.remap.post(old));
        let author_key = item.creator.clone().map(UserKey::Login);
        let author = author_key
            .as_ref()
            .and_then(|key| self.remap.user(key))
            .or_else(|| self.default_author());

        let mut terms = Vec::with_capacity(item.terms.len());
        for term_ref in &item.terms {
            terms.push(self.resolve_term_ref(term_ref)?);
        }

        let new_post = NewPost {
            kind: item.kind,
            guid: item.guid.clone(),
            title: item.title.clone(),
            content: item.content.clone(),
            excerpt: item.excerpt.clone(),
            slug: item.slug.clone(),
            status: item.status.clone(),
            parent,
            author,
            date: item.date,
            modified: item.modified,
            menu_order: item.menu_order,
            terms,
        };

        let id = match item.kind {
            PostKind::Attachment => self.create_attachment(&item, new_post)?,
            PostKind::Module | PostKind::Page => self.store.insert_post(new_post)?,
        };

        self.existence.mark_post(&item.guid, id);
        self.remap.map_post(item.id, id);
        self.created.push(ImportedPost {
            id,
            old_id: item.id,
            kind: item.kind,
        });
        if item.kind == PostKind::Attachment {
            self.stats.attachments_created += 1;
        } else {
            self.stats.posts_created += 1;
        }

        if let (Some(old_parent), None) = (item.parent, parent) {
            self.fixups.push(DeferredFixup::PostParent {
                post: id,
                old_parent,
            });
        }
        if let Some(key) = author_key {
            if self.remap.user(&key).is_none() {
                self.fixups.push(DeferredFixup::PostAuthor {
                    post: id,
                    author: key,
                });
            }
        }

        self.copy_meta(&item, id)?;
        self.store
            .set_post_meta(id, META_IMPORT_SOURCE_ID, &item.id.to_string())?;

        if item.kind != PostKind::Attachment
            && !(item.content.is_empty() && item.excerpt.is_empty())
        {
            self.fixups.push(DeferredFixup::ContentReferences { post: id });
        }

        self.import_comments(&item, id)?;

        let deferred = self.fixups[fixups_before..]
            .iter()
            .any(|f| !matches!(f, DeferredFixup::ContentReferences { .. }));
        Ok(if deferred {
            RecordOutcome::CreatedDeferred
        } else {
            RecordOutcome::Created
        })
    }

    fn copy_meta(&mut self, item: &ItemRecord, id: PostId) -> Result<(), ImportError> {
        for pair in &item.meta {
            if SOURCE_ONLY_META.contains(&pair.key.as_str()) {
                continue;
            }
            if pair.key == META_THUMBNAIL_ID {
                let Ok(old) = pair.value.trim().parse::<u64>() else {
                    self.reporter.warn(format!(
                        "Ignoring malformed featured image '{}' on {}",
                        pair.value, id
                    ));
                    continue;
                };
                let old_attachment = PostOldId(old);
                match self.remap.post(old_attachment) {
                    Some(new) => self.store.set_post_meta(id, &pair.key, &new.to_string())?,
                    None => self.fixups.push(DeferredFixup::FeaturedImage {
                        post: id,
                        old_attachment,
                    }),
                }
                continue;
            }
            // _module_pages is rewritten in bulk once every page is mapped
            self.store.set_post_meta(id, &pair.key, &pair.value)?;
        }
        Ok(())
    }

    fn create_attachment(&mut self, item: &ItemRecord, post: NewPost) -> Result<PostId, ImportError> {
        let old_url = item.attachment_url.as_deref().ok_or_else(|| {
            ImportError::MalformedRecord(format!("attachment {} has no attachment_url", item.id))
        })?;

        let media = self
            .media
            .resolve(old_url, item.meta(META_ATTACHMENT_SHA256))?;
        let (id, new_url) = self
            .store
            .insert_attachment(post, &media.path, &media.relative_path)?;
        let sizes = self.store.generate_derived_sizes(id)?;

        for (old, new) in
            derived_url_mappings(old_url, &new_url, item.meta(META_ATTACHMENT_SIZES), &sizes)
        {
            self.remap.map_url(old, new);
        }
        self.reporter.debug(format!(
            "Attachment {} stored as {} ({} derived sizes{})",
            old_url,
            new_url,
            sizes.len(),
            if media.bundled { ", bundled" } else { "" }
        ));
        Ok(id)
    }

    /// URL mappings for an attachment imported by an earlier run
    fn map_existing_attachment(&mut self, item: &ItemRecord, id: PostId) -> Result<(), ImportError> {
        let (Some(old_url), Some(post)) = (item.attachment_url.as_deref(), self.store.post(id)?)
        else {
            return Ok(());
        };
        let Some(new_url) = post.attachment_url.as_deref() else {
            return Ok(());
        };
        let dir = new_url.rsplit_once('/').map(|(d, _)| d).unwrap_or(new_url);
        let sizes: Vec<DerivedSize> = post
            .meta(META_ATTACHMENT_SIZES)
            .and_then(|raw| serde_json::from_str::<Vec<SizeEntry>>(raw).ok())
            .unwrap_or_default()
            .into_iter()
            .map(|e| DerivedSize {
                width: e.width,
                height: e.height,
                url: format!("{}/{}", dir, e.file),
            })
            .collect();
        for (old, new) in
            derived_url_mappings(old_url, new_url, item.meta(META_ATTACHMENT_SIZES), &sizes)
        {
            self.remap.map_url(old, new);
        }
        Ok(())
    }

    fn import_comments(&mut self, item: &ItemRecord, post: PostId) -> Result<(), ImportError> {
        for comment in &item.comments {
            if let Err(e) = self.import_comment(comment, post) {
                if e.is_fatal() {
                    return Err(e);
                }
                self.reporter.error(format!(
                    "Failed to import comment {} on {}: {}",
                    comment.id, post, e
                ));
            }
        }
        Ok(())
    }

    fn import_comment(&mut self, comment: &CommentRecord, post: PostId) -> Result<(), ImportError> {
        if let Some(existing) =
            self.existence
                .comment(&*self.store, &comment.author_name, comment.date)?
        {
            self.remap.map_comment(comment.id, existing);
            self.stats.comments_existing += 1;
            return Ok(());
        }

        let parent = comment.parent.and_then(|old| self.remap.comment(old));
        let user_key = comment.user_id.map(UserKey::Id);
        let user = user_key.as_ref().and_then(|key| self.remap.user(key));

        let id = self.store.insert_comment(NewComment {
            post,
            author_name: comment.author_name.clone(),
            author_email: comment.author_email.clone(),
            author_url: comment.author_url.clone(),
            date: comment.date,
            content: comment.content.clone(),
            approved: comment.approved.clone(),
            comment_type: comment.comment_type.clone(),
            parent,
            user,
        })?;
        for pair in &comment.meta {
            self.store.set_comment_meta(id, &pair.key, &pair.value)?;
        }

        self.existence
            .mark_comment(&comment.author_name, comment.date, id);
        self.remap.map_comment(comment.id, id);
        self.stats.comments_created += 1;

        if let (Some(old_parent), None) = (comment.parent, parent) {
            self.fixups.push(DeferredFixup::CommentParent {
                comment: id,
                old_parent,
            });
        }
        if let (Some(key), None) = (user_key, user) {
            self.fixups
                .push(DeferredFixup::CommentAuthor { comment: id, user: key });
        }
        Ok(())
    }
}

/// Builder for [`ImportCoordinator`]
pub struct ImportCoordinatorBuilder {
    config: ImportConfig,
    archive_dir: Option<PathBuf>,
    fetcher: Option<Box<dyn MediaFetcher>>,
    index_mode: Option<IndexMode>,
}

impl ImportCoordinatorBuilder {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            archive_dir: None,
            fetcher: None,
            index_mode: None,
        }
    }

    /// Directory the archive was extracted into, searched for bundled media
    pub fn with_archive_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.archive_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Use a specific fetcher for remote media instead of HTTP
    pub fn with_fetcher(mut self, fetcher: Box<dyn MediaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Override `prefetch_existing`
    pub fn with_index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = Some(mode);
        self
    }

    /// Stop after this many items
    pub fn with_max_records(mut self, max: Option<usize>) -> Self {
        self.config.max_records = max;
        self
    }

    pub fn build<'a, S: ContentStore + ?Sized>(
        self,
        store: &'a mut S,
        reporter: &'a ProgressReporter,
    ) -> Result<ImportCoordinator<'a, S>, ImportError> {
        let mode = self.index_mode.unwrap_or(if self.config.prefetch_existing {
            IndexMode::Prefetch
        } else {
            IndexMode::Lazy
        });
        let existence = ExistenceIndex::build(mode, &*store)?;

        let fetcher = match self.fetcher {
            Some(fetcher) => Some(fetcher),
            None if self.config.fetch_remote_media => Some(Box::new(HttpFetcher::new(
                Duration::from_secs(self.config.fetch_timeout_secs),
                self.config.max_media_size,
            )?) as Box<dyn MediaFetcher>),
            None => None,
        };
        let media = MediaResolver::new(self.archive_dir, String::new(), fetcher)?;

        Ok(ImportCoordinator {
            store,
            reporter,
            config: self.config,
            remap: RemapTable::new(),
            existence,
            fixups: Vec::new(),
            media,
            header: None,
            created: Vec::new(),
            pending_modules: Vec::new(),
            stats: ImportStats::default(),
            items_seen: 0,
        })
    }
}
