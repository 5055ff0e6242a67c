//! Import configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Import configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory holding one working directory per import run
    pub work_dir: PathBuf,
    /// Accepted upload extensions
    pub archive_extensions: Vec<String>,
    /// File extensions allowed to remain after extraction
    pub safe_extensions: Vec<String>,
    /// Load every existing identity from the store before the run starts,
    /// instead of querying the store on first use
    pub prefetch_existing: bool,
    /// Create users for archive authors that do not exist yet
    pub create_users: bool,
    /// User id assigned to content whose author cannot be resolved
    #[serde(default)]
    pub default_author: Option<u64>,
    /// Download attachments that are not bundled in the archive
    pub fetch_remote_media: bool,
    /// Largest attachment accepted, in bytes
    pub max_media_size: u64,
    /// Timeout for one attachment download, in seconds
    pub fetch_timeout_secs: u64,
    /// Stop after this many items (None = unlimited)
    #[serde(default)]
    pub max_records: Option<usize>,
    /// Forward debug-level events to the caller
    #[serde(default)]
    pub verbose_events: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(".modmigrate/imports"),
            archive_extensions: vec!["zip".to_string()],
            safe_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "ico", "pdf", "doc", "docx", "ppt", "pptx",
                "pps", "ppsx", "odt", "xls", "xlsx", "csv", "txt", "mp3", "m4a", "ogg", "wav",
                "mp4", "m4v", "mov", "webm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            prefetch_existing: true,
            create_users: true,
            default_author: None,
            fetch_remote_media: true,
            max_media_size: 50 * 1024 * 1024, // 50 MB
            fetch_timeout_secs: 60,
            max_records: None,
            verbose_events: false,
        }
    }
}
