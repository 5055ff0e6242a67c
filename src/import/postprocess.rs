//! Second pass over an import run
//!
//! Runs once the whole document has streamed and every identity the archive
//! carries is mapped. Resolves the deferred relationships, rewrites source
//! references inside content, rewrites module page lists and drops the
//! bookkeeping metadata the main pass left behind.

use super::coordinator::{
    CoordinatorOutput, META_IMPORT_SOURCE_ID, META_PENDING_PAGES, META_PENDING_REFS,
};
use super::fixup::DeferredFixup;
use super::progress::{ImportStage, ProgressReporter};
use super::remap::RemapTable;
use super::rewrite::{replace_urls, rewrite_block_references};
use super::types::ImportError;
use crate::store::{ContentStore, StoreError, META_MODULE_PAGES, META_THUMBNAIL_ID};
use crate::types::{PostId, PostKind};
use serde::Serialize;

/// Summary of the post-processing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostProcessReport {
    pub fixups_resolved: usize,
    pub fixups_unresolved: usize,
    /// Attachment URLs replaced inside content
    pub urls_rewritten: usize,
    /// Block-comment ids replaced inside content
    pub block_refs_rewritten: usize,
    /// Modules whose page list was rewritten
    pub module_pages_rewritten: usize,
    /// Posts that lost their bookkeeping meta
    pub meta_purged: usize,
}

/// Whether a fixup could be applied
enum Resolution {
    Applied,
    Missing(String),
}

/// Post-processing pass over one run's output
pub struct PostProcessor<'a, S: ContentStore + ?Sized> {
    store: &'a mut S,
    reporter: &'a ProgressReporter,
}

impl<'a, S: ContentStore + ?Sized> PostProcessor<'a, S> {
    pub fn new(store: &'a mut S, reporter: &'a ProgressReporter) -> Self {
        Self { store, reporter }
    }

    pub fn run(&mut self, output: &CoordinatorOutput) -> Result<PostProcessReport, ImportError> {
        let mut report = PostProcessReport::default();
        self.reporter.info(format!(
            "Post-processing {} deferred relationships",
            output.fixups.len()
        ));

        let url_pairs = output.remap.urls_longest_first();
        for fixup in &output.fixups {
            match self.resolve(fixup, output, &url_pairs, &mut report) {
                Ok(Resolution::Applied) => report.fixups_resolved += 1,
                Ok(Resolution::Missing(reason)) => {
                    report.fixups_unresolved += 1;
                    self.reporter
                        .warn(format!("Unresolved {}: {}", fixup, reason));
                }
                Err(e) => {
                    report.fixups_unresolved += 1;
                    self.reporter
                        .warn(format!("Could not apply {}: {}", fixup, e));
                }
            }
        }

        let modules = output
            .created
            .iter()
            .filter(|p| p.kind == PostKind::Module)
            .map(|p| p.id)
            .chain(output.pending_modules.iter().copied());
        for module in modules {
            match self.rewrite_module_pages(module, &output.remap, output.truncated) {
                Ok(true) => report.module_pages_rewritten += 1,
                Ok(false) => {}
                Err(e) => self
                    .reporter
                    .warn(format!("Could not rewrite page list of module {}: {}", module, e)),
            }
        }

        report.meta_purged = self.store.delete_post_meta_by_key(META_IMPORT_SOURCE_ID)?;

        self.reporter.progress(ImportStage::PostProcessing, &output.stats);
        self.reporter.info(format!(
            "Post-processing done: {} resolved, {} unresolved, {} URLs and {} block references rewritten",
            report.fixups_resolved,
            report.fixups_unresolved,
            report.urls_rewritten,
            report.block_refs_rewritten
        ));
        Ok(report)
    }

    fn resolve(
        &mut self,
        fixup: &DeferredFixup,
        output: &CoordinatorOutput,
        url_pairs: &[(&str, &str)],
        report: &mut PostProcessReport,
    ) -> Result<Resolution, StoreError> {
        let remap = &output.remap;
        let resolution = match fixup {
            DeferredFixup::PostParent { post, old_parent } => match remap.post(*old_parent) {
                Some(parent) => {
                    self.store.update_post_parent(*post, parent)?;
                    Resolution::Applied
                }
                None => Resolution::Missing(format!("post {} was not imported", old_parent)),
            },
            DeferredFixup::PostAuthor { post, author } => match remap.user(author) {
                Some(user) => {
                    self.store.update_post_author(*post, user)?;
                    Resolution::Applied
                }
                None => Resolution::Missing(format!("no user for {}", author)),
            },
            DeferredFixup::CommentParent {
                comment,
                old_parent,
            } => match remap.comment(*old_parent) {
                Some(parent) => {
                    self.store.update_comment_parent(*comment, parent)?;
                    Resolution::Applied
                }
                None => Resolution::Missing(format!("comment {} was not imported", old_parent)),
            },
            DeferredFixup::CommentAuthor { comment, user } => match remap.user(user) {
                Some(id) => {
                    self.store.update_comment_user(*comment, id)?;
                    Resolution::Applied
                }
                None => Resolution::Missing(format!("no user for {}", user)),
            },
            DeferredFixup::TermParent { term, parent } => {
                let found = match remap.term(parent) {
                    Some(id) => Some(id),
                    None => self.store.find_term(parent)?,
                };
                match found {
                    Some(parent_id) => {
                        self.store.update_term_parent(*term, parent_id)?;
                        Resolution::Applied
                    }
                    None => Resolution::Missing(format!("term {} does not exist", parent)),
                }
            }
            DeferredFixup::FeaturedImage {
                post,
                old_attachment,
            } => match remap.post(*old_attachment) {
                Some(attachment) => {
                    self.store
                        .set_post_meta(*post, META_THUMBNAIL_ID, &attachment.to_string())?;
                    Resolution::Applied
                }
                None => Resolution::Missing(format!(
                    "attachment {} was not imported",
                    old_attachment
                )),
            },
            DeferredFixup::ContentReferences { post } => {
                self.rewrite_content(*post, remap, output.truncated, url_pairs, report)?
            }
        };
        Ok(resolution)
    }

    /// Rewrite source URLs and block references in one post's content.
    ///
    /// A post left with pending references by an earlier run only has those
    /// ids rewritten; the rest of its content already holds destination ids.
    /// References still unmapped on a truncated run are recorded as pending.
    fn rewrite_content(
        &mut self,
        id: PostId,
        remap: &RemapTable,
        truncated: bool,
        url_pairs: &[(&str, &str)],
        report: &mut PostProcessReport,
    ) -> Result<Resolution, StoreError> {
        let Some(post) = self.store.post(id)? else {
            return Ok(Resolution::Missing(format!("post {} vanished", id)));
        };
        let pending: Option<Vec<u64>> = post
            .meta(META_PENDING_REFS)
            .and_then(|raw| serde_json::from_str(raw).ok());

        let (content, urls) = replace_urls(&post.content, url_pairs);
        let blocks = rewrite_block_references(&content, |old| match &pending {
            Some(ids) if !ids.contains(&old.get()) => None,
            _ => remap.post(old),
        });
        let mut unresolved: Vec<u64> = blocks
            .unresolved
            .iter()
            .copied()
            .filter(|old| pending.as_ref().map_or(true, |ids| ids.contains(old)))
            .collect();
        unresolved.sort_unstable();
        unresolved.dedup();

        if blocks.content != post.content {
            self.store.update_post_content(id, &blocks.content)?;
        }
        if !unresolved.is_empty() && truncated {
            self.reporter.info(format!(
                "Post {} is waiting for posts {:?}; its references are rewritten when the import is run again",
                id, unresolved
            ));
            self.store
                .set_post_meta(id, META_PENDING_REFS, &serde_json::to_string(&unresolved)?)?;
        } else {
            if !unresolved.is_empty() {
                self.reporter.warn(format!(
                    "Post {} references posts that were not imported: {:?}",
                    id, unresolved
                ));
            }
            if pending.is_some() {
                self.store.delete_post_meta(id, META_PENDING_REFS)?;
            }
        }
        report.urls_rewritten += urls;
        report.block_refs_rewritten += blocks.rewritten;
        Ok(Resolution::Applied)
    }

    /// Rewrite a module's page list through the post map.
    ///
    /// The source list comes from the pending meta when an earlier run left
    /// one, otherwise from the page list copied from the archive. Pages that
    /// are not mapped are kept pending when the run stopped early and dropped
    /// otherwise.
    fn rewrite_module_pages(
        &mut self,
        module: PostId,
        remap: &RemapTable,
        truncated: bool,
    ) -> Result<bool, StoreError> {
        let Some(post) = self.store.post(module)? else {
            return Ok(false);
        };
        let Some(raw) = post
            .meta(META_PENDING_PAGES)
            .or_else(|| post.meta(META_MODULE_PAGES))
            .map(str::to_string)
        else {
            return Ok(false);
        };
        let old_ids: Vec<u64> = match serde_json::from_str(&raw) {
            Ok(ids) => ids,
            Err(e) => {
                self.reporter.warn(format!(
                    "Module {} has a malformed page list: {}",
                    module, e
                ));
                return Ok(false);
            }
        };

        let mut new_ids = Vec::with_capacity(old_ids.len());
        let mut missing = Vec::new();
        for old in old_ids {
            match remap.post(old.into()) {
                Some(new) => new_ids.push(new.get()),
                None => missing.push(old),
            }
        }

        if !missing.is_empty() && truncated {
            self.reporter.info(format!(
                "Module {} is waiting for pages {:?}; they are linked when the import is run again",
                module, missing
            ));
            self.store.set_post_meta(module, META_PENDING_PAGES, &raw)?;
        } else {
            for old in &missing {
                self.reporter.warn(format!(
                    "Dropping page {} from module {}: not imported",
                    old, module
                ));
            }
            self.store.delete_post_meta(module, META_PENDING_PAGES)?;
        }
        self.store
            .set_post_meta(module, META_MODULE_PAGES, &serde_json::to_string(&new_ids)?)?;
        Ok(true)
    }
}
