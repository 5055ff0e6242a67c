//! Module export
//!
//! Gathers a module, its pages and the media they reference, streams them
//! into an archive document and packages the document together with the
//! media files and a readme into one zip.
//!
//! # Example Usage
//!
//! ```no_run
//! use modmigrate::config::ExportConfig;
//! use modmigrate::export::{ExportOptions, Exporter};
//! use modmigrate::store::{MemoryStore, SiteInfo};
//! use modmigrate::types::PostId;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = MemoryStore::new(SiteInfo::default(), "media");
//! let path = Exporter::new(&mut store, ExportConfig::default())
//!     .export(PostId(10), ExportOptions::default())?;
//! println!("Wrote {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod graph;
pub mod packager;
pub mod readme;
pub mod writer;

pub use graph::{ContentGraphReader, ExportUnit};
pub use packager::{ArchivePackager, MediaFile};
pub use readme::{render_readme, ReadmeContext};
pub use writer::{ArchiveWriter, WriteSummary};

use crate::archive::DOCUMENT_NAME;
use crate::config::ExportConfig;
use crate::import::media::relative_upload_path;
use crate::store::{ContentStore, StoreError};
use crate::types::PostId;
use chrono::Utc;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Archive support unavailable: {0}")]
    Unavailable(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<quick_xml::Error> for ExportError {
    fn from(e: quick_xml::Error) -> Self {
        ExportError::Xml(e.to_string())
    }
}

/// Caller-supplied extras for one export
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Free text added to the readme
    pub notes: Option<String>,
    /// Acknowledgement shown inside the exported module content
    pub acknowledgement: Option<String>,
}

/// Marker comments around an injected acknowledgement
const ACK_OPEN: &str = "<!-- module-acknowledgement -->";
const ACK_CLOSE: &str = "<!-- /module-acknowledgement -->";

fn acknowledgement_block(text: &str) -> String {
    format!(
        "\n{}\n<div class=\"module-acknowledgement\">{}</div>\n{}",
        ACK_OPEN,
        text.trim(),
        ACK_CLOSE
    )
}

fn archive_name(module: PostId, slug: &str) -> String {
    let slug: String = slug
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    if slug.is_empty() {
        format!("module-{}-{}.zip", module, stamp)
    } else {
        format!("module-{}-{}-{}.zip", module, slug, stamp)
    }
}

/// Runs module exports against one store
pub struct Exporter<'a, S: ContentStore + ?Sized> {
    store: &'a mut S,
    config: ExportConfig,
}

impl<'a, S: ContentStore + ?Sized> Exporter<'a, S> {
    pub fn new(store: &'a mut S, config: ExportConfig) -> Self {
        Self { store, config }
    }

    /// Export `module` and return the path of the archive.
    ///
    /// An acknowledgement is written into the module content for the duration
    /// of the export and the original content is put back afterwards, whether
    /// or not the export succeeded.
    pub fn export(&mut self, module: PostId, options: ExportOptions) -> Result<PathBuf, ExportError> {
        let packager = ArchivePackager::new(&self.config.work_dir);
        let purged = packager.purge_stale()?;
        if purged > 0 {
            debug!("Purged {} stale export artifacts", purged);
        }

        let ack = options
            .acknowledgement
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());
        let Some(ack) = ack else {
            return self.export_unit(module, &packager, options.notes.as_deref());
        };

        let original = self
            .store
            .post(module)?
            .ok_or_else(|| ExportError::NotFound(format!("module {}", module)))?
            .content;
        self.store
            .update_post_content(module, &format!("{}{}", original, acknowledgement_block(ack)))?;

        let result = self.export_unit(module, &packager, options.notes.as_deref());

        if let Err(e) = self.store.update_post_content(module, &original) {
            warn!("Failed to restore content of module {}: {}", module, e);
            if result.is_ok() {
                return Err(e.into());
            }
        }
        result
    }

    fn export_unit(
        &self,
        module: PostId,
        packager: &ArchivePackager,
        notes: Option<&str>,
    ) -> Result<PathBuf, ExportError> {
        let store: &S = &*self.store;
        let unit = ContentGraphReader::new(store, &self.config)?.read(module)?;
        info!(
            "Exporting module {} ({} pages, {} attachments)",
            module,
            unit.pages.len(),
            unit.attachments.len()
        );

        let document = packager.work_dir().join(DOCUMENT_NAME);
        ArchiveWriter::new(store, &self.config).write(&unit, &document)?;

        let site = store.site_info();
        let mut files = Vec::new();
        if self.config.include_media {
            for post in store.posts(&unit.attachments.iter().copied().collect::<Vec<_>>())? {
                let Some(url) = post.attachment_url.as_deref() else {
                    continue;
                };
                match store.attachment_file(post.id)? {
                    Some(source) => files.push(MediaFile {
                        source,
                        archive_path: relative_upload_path(url, &site.uploads_url),
                    }),
                    None => warn!("Media file of attachment {} is missing; not bundled", post.id),
                }
            }
        }

        let module_post = store
            .post(module)?
            .ok_or_else(|| ExportError::NotFound(format!("module {}", module)))?;
        let readme = render_readme(&ReadmeContext {
            site: &site,
            module: &module_post,
            pages: unit.pages.len(),
            attachments: unit.attachments.len(),
            created: Utc::now(),
            notes,
        });

        packager.package(
            &archive_name(module, &module_post.slug),
            &document,
            &readme,
            &files,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_name_sanitises_slug() {
        let name = archive_name(PostId(10), "Intro to Rust!");
        assert!(name.starts_with("module-10-intro-to-rust-"));
        assert!(name.ends_with(".zip"));
        assert!(archive_name(PostId(3), "").starts_with("module-3-2"));
    }

    #[test]
    fn test_acknowledgement_block_is_marked() {
        let block = acknowledgement_block("  Thanks to the Rust team ");
        assert!(block.contains(ACK_OPEN));
        assert!(block.contains(">Thanks to the Rust team<"));
        assert!(block.ends_with(ACK_CLOSE));
    }
}
