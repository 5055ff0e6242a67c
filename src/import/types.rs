//! Core types for import runs

use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use super::media::MediaError;

/// File name of the run record inside a run's working directory
pub const RUN_RECORD_FILE: &str = "run.json";

/// Errors that can occur during import
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Invalid archive format: {0}")]
    InvalidFormat(String),

    #[error("Archive support unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Import run {0} not found")]
    RunNotFound(Uuid),

    #[error("Import run {0} already started")]
    RunAlreadyStarted(Uuid),
}

impl ImportError {
    /// Whether this error ends the whole run rather than a single record.
    ///
    /// A store that cannot write its files fails every later record too.
    pub fn is_fatal(&self) -> bool {
        match self {
            ImportError::Store(StoreError::Io(_)) => true,
            ImportError::MalformedRecord(_) | ImportError::Store(_) | ImportError::Media(_) => {
                false
            }
            _ => true,
        }
    }
}

impl From<quick_xml::Error> for ImportError {
    fn from(e: quick_xml::Error) -> Self {
        ImportError::XmlParse(e.to_string())
    }
}

/// Import statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportStats {
    /// Top-level records read from the document
    pub records_processed: usize,
    /// Records that failed and were skipped
    pub records_failed: usize,
    pub posts_created: usize,
    pub posts_existing: usize,
    pub attachments_created: usize,
    pub comments_created: usize,
    pub comments_existing: usize,
    pub terms_created: usize,
    pub terms_existing: usize,
    pub users_created: usize,
    pub users_existing: usize,
    /// Deferred relationships resolved in post-processing
    pub fixups_resolved: usize,
    /// Deferred relationships still unresolved after post-processing
    pub fixups_unresolved: usize,
    /// Processing time in seconds
    pub elapsed_seconds: f64,
}

/// Lifecycle of a prepared import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Prepared,
    Running,
    Completed,
    Failed,
}

/// Persistent record of an import run, stored as `run.json` in its directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRunRecord {
    pub id: Uuid,
    /// Original upload file name
    pub upload_name: String,
    /// Extracted archive directory
    pub work_dir: PathBuf,
    /// Serialized document inside `work_dir`
    pub document: PathBuf,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Option<ImportStats>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ImportRunRecord {
    /// Save the record into its working directory
    pub fn save(&self) -> Result<(), ImportError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(self.work_dir.join(RUN_RECORD_FILE), json)?;
        Ok(())
    }

    /// Load a record from a run directory
    pub fn load(run_dir: &Path) -> Result<Self, ImportError> {
        let json = std::fs::read_to_string(run_dir.join(RUN_RECORD_FILE))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Mark the run finished with its outcome
    pub fn finish(&mut self, result: Result<&ImportStats, &str>) {
        self.finished_at = Some(Utc::now());
        match result {
            Ok(stats) => {
                self.status = RunStatus::Completed;
                self.stats = Some(stats.clone());
                self.error = None;
            }
            Err(e) => {
                self.status = RunStatus::Failed;
                self.error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_record_round_trip() {
        let temp = TempDir::new().unwrap();
        let mut record = ImportRunRecord {
            id: Uuid::new_v4(),
            upload_name: "module.zip".to_string(),
            work_dir: temp.path().to_path_buf(),
            document: temp.path().join("export.xml"),
            status: RunStatus::Prepared,
            created_at: Utc::now(),
            finished_at: None,
            stats: None,
            error: None,
        };
        record.save().unwrap();

        let loaded = ImportRunRecord::load(temp.path()).unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.status, RunStatus::Prepared);

        record.finish(Err("archive vanished"));
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("archive vanished"));
    }

    #[test]
    fn test_store_io_failure_is_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        assert!(ImportError::Store(StoreError::Io(io)).is_fatal());
        assert!(!ImportError::Store(StoreError::Rejected("empty title".to_string())).is_fatal());
        assert!(!ImportError::MalformedRecord("no id".to_string()).is_fatal());
        assert!(ImportError::XmlParse("eof".to_string()).is_fatal());
    }
}
