//! Two-step import runs: prepare an upload, then run it with streamed events

use super::coordinator::ImportCoordinatorBuilder;
use super::progress::{ChannelSink, ImportEvent, ProgressReporter};
use super::types::{ImportError, ImportRunRecord, RunStatus};
use super::unpack::ArchiveUnpacker;
use crate::config::ImportConfig;
use crate::store::ContentStore;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Manages import runs against one shared store
pub struct ImportService<S: ContentStore + 'static> {
    store: Arc<Mutex<S>>,
    config: ImportConfig,
    runs: Arc<DashMap<Uuid, ImportRunRecord>>,
}

impl<S: ContentStore + 'static> Clone for ImportService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            runs: self.runs.clone(),
        }
    }
}

impl<S: ContentStore + 'static> ImportService<S> {
    pub fn new(store: Arc<Mutex<S>>, config: ImportConfig) -> Self {
        Self {
            store,
            config,
            runs: Arc::new(DashMap::new()),
        }
    }

    /// The store runs write into
    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    fn run_dir(&self, id: Uuid) -> PathBuf {
        self.config.work_dir.join(id.to_string())
    }

    /// Unpack an upload into a fresh run directory and record the run.
    ///
    /// Returns the run id to pass to [`ImportService::run`].
    pub async fn prepare(&self, upload: impl AsRef<Path>) -> Result<Uuid, ImportError> {
        let upload = upload.as_ref().to_path_buf();
        let id = Uuid::new_v4();
        let run_dir = self.run_dir(id);
        let unpacker = ArchiveUnpacker::new(&self.config);

        let unpack_dir = run_dir.clone();
        let unpack_upload = upload.clone();
        let unpacked = tokio::task::spawn_blocking(move || {
            unpacker.unpack(&unpack_upload, &unpack_dir)
        })
        .await
        .map_err(|e| ImportError::Io(std::io::Error::other(e)))?;

        let unpacked = match unpacked {
            Ok(unpacked) => unpacked,
            Err(e) => {
                match std::fs::remove_dir_all(&run_dir) {
                    Ok(()) => {}
                    Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                    Err(cleanup) => warn!(
                        "Failed to remove run directory {}: {}",
                        run_dir.display(),
                        cleanup
                    ),
                }
                return Err(e);
            }
        };

        let record = ImportRunRecord {
            id,
            upload_name: upload
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            work_dir: unpacked.root,
            document: unpacked.document,
            status: RunStatus::Prepared,
            created_at: Utc::now(),
            finished_at: None,
            stats: None,
            error: None,
        };
        record.save()?;
        info!("Prepared import run {} from {}", id, upload.display());
        self.runs.insert(id, record);
        Ok(id)
    }

    /// Current record of a run, from memory or from its run directory
    pub fn status(&self, id: Uuid) -> Result<ImportRunRecord, ImportError> {
        if let Some(record) = self.runs.get(&id) {
            return Ok(record.clone());
        }
        let run_dir = self.run_dir(id);
        if !run_dir.is_dir() {
            return Err(ImportError::RunNotFound(id));
        }
        let record = ImportRunRecord::load(&run_dir)?;
        self.runs.insert(id, record.clone());
        Ok(record)
    }

    /// Start a prepared run.
    ///
    /// The import runs on the blocking pool; events arrive on the returned
    /// stream as they happen and the stream ends after the `complete` event.
    /// Dropping the stream does not stop the run.
    pub fn run(&self, id: Uuid) -> Result<UnboundedReceiverStream<ImportEvent>, ImportError> {
        let mut record = self.status(id)?;
        if record.status != RunStatus::Prepared {
            return Err(ImportError::RunAlreadyStarted(id));
        }
        record.status = RunStatus::Running;
        record.save()?;
        self.runs.insert(id, record.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(
            Box::new(ChannelSink::new(tx)),
            self.config.verbose_events,
        );
        let store = self.store.clone();
        let runs = self.runs.clone();
        let builder =
            ImportCoordinatorBuilder::new(self.config.clone()).with_archive_dir(&record.work_dir);

        tokio::task::spawn_blocking(move || {
            reporter.started(Some(id), &record.upload_name);

            let result = {
                let mut store = store.lock();
                super::import_document(&mut *store, &record.document, builder, &reporter)
            };

            match &result {
                Ok(stats) => {
                    info!("Import run {} completed", id);
                    record.finish(Ok(stats));
                }
                Err(e) => {
                    error!("Import run {} failed: {}", id, e);
                    record.finish(Err(&e.to_string()));
                }
            }
            if let Err(e) = record.save() {
                error!("Failed to save run record for {}: {}", id, e);
            }
            runs.insert(id, record);

            match &result {
                Ok(stats) => reporter.complete(Ok(stats)),
                Err(e) => reporter.complete(Err(&e.to_string())),
            }
        });

        Ok(UnboundedReceiverStream::new(rx))
    }
}
