//! Archive import with identity remapping
//!
//! Reconstructs an exported module on a destination store. The archive is
//! unpacked and sanitised, its document is streamed record by record, and
//! every source id is translated to the id the destination hands out.
//! Relationships that point forward in the document are deferred and applied
//! in a second pass, together with rewriting of the URLs and block references
//! embedded in content.
//!
//! # Example Usage
//!
//! ```no_run
//! use modmigrate::config::ImportConfig;
//! use modmigrate::import::{import_archive, ProgressReporter};
//! use modmigrate::store::{MemoryStore, SiteInfo};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = MemoryStore::new(SiteInfo::default(), "media");
//! let reporter = ProgressReporter::silent();
//! let stats = import_archive(
//!     &mut store,
//!     "module.zip".as_ref(),
//!     "work/run-1".as_ref(),
//!     &ImportConfig::default(),
//!     &reporter,
//! )?;
//! println!("Created {} posts", stats.posts_created);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────────────┐
//! │ ArchiveUnpacker  │──▶│  ArchiveParser   │──▶│    ImportCoordinator     │
//! │ - extension gate │   │ - pull reader    │   │ - ExistenceIndex         │
//! │ - safe extract   │   │ - one record at  │   │ - RemapTable             │
//! │ - purge unsafe   │   │   a time         │   │ - MediaResolver          │
//! └──────────────────┘   └──────────────────┘   │ - DeferredFixup worklist │
//!                                               └──────────────────────────┘
//!                                                            │
//!                                                            ▼
//!                        ┌──────────────────┐   ┌──────────────────────────┐
//!                        │ ProgressReporter │◀──│      PostProcessor       │
//!                        │ (every stage)    │   │ - fixups, URL rewrite    │
//!                        └──────────────────┘   │ - page lists, cleanup    │
//!                                               └──────────────────────────┘
//! ```

pub mod coordinator;
pub mod existence;
pub mod fixup;
pub mod media;
pub mod parser;
pub mod postprocess;
pub mod progress;
pub mod remap;
pub mod rewrite;
pub mod service;
pub mod types;
pub mod unpack;

// Re-export main types
pub use coordinator::{ImportCoordinator, ImportCoordinatorBuilder, RecordOutcome};
pub use existence::{ExistenceIndex, IndexMode};
pub use fixup::DeferredFixup;
pub use media::{HttpFetcher, MediaError, MediaFetcher};
pub use parser::{ArchiveParser, ParserState};
pub use postprocess::{PostProcessReport, PostProcessor};
pub use progress::{
    ChannelSink, EventLevel, EventSink, ImportEvent, ImportStage, MemorySink, NullSink,
    ProgressReporter, SseWriterSink,
};
pub use remap::RemapTable;
pub use service::ImportService;
pub use types::{ImportError, ImportRunRecord, ImportStats, RunStatus};
pub use unpack::{ArchiveUnpacker, UnpackedArchive};

use crate::config::ImportConfig;
use crate::store::ContentStore;
use std::path::Path;

/// Import an already extracted document.
///
/// Runs the main pass and the post-processing pass. Fatal errors are
/// returned; per-record failures only show up in the stats and the reporter.
pub fn import_document<S: ContentStore + ?Sized>(
    store: &mut S,
    document: &Path,
    builder: ImportCoordinatorBuilder,
    reporter: &ProgressReporter,
) -> Result<ImportStats, ImportError> {
    let parser = ArchiveParser::open(document)?;
    let output = builder.build(store, reporter)?.import(parser)?;
    if output.truncated {
        reporter.warn("Import stopped early; run it again to pick up the remaining records");
    }

    let report = PostProcessor::new(store, reporter).run(&output)?;

    let mut stats = output.stats;
    stats.fixups_resolved = report.fixups_resolved;
    stats.fixups_unresolved = report.fixups_unresolved;
    stats.elapsed_seconds = reporter.elapsed_seconds();
    reporter.progress(ImportStage::Done, &stats);
    Ok(stats)
}

/// Unpack `upload` into `work_dir` and import it
pub fn import_archive<S: ContentStore + ?Sized>(
    store: &mut S,
    upload: &Path,
    work_dir: &Path,
    config: &ImportConfig,
    reporter: &ProgressReporter,
) -> Result<ImportStats, ImportError> {
    reporter.progress(ImportStage::Unpacking, &ImportStats::default());
    let unpacked = ArchiveUnpacker::new(config).unpack(upload, work_dir)?;
    for removed in &unpacked.files_removed {
        reporter.warn(format!("Removed disallowed file {}", removed.display()));
    }

    let source = upload
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    reporter.started(None, &source);

    let builder = ImportCoordinatorBuilder::new(config.clone()).with_archive_dir(&unpacked.root);
    import_document(store, &unpacked.document, builder, reporter)
}
