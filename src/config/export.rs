//! Export configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Working directory for generated documents and archives
    pub work_dir: PathBuf,
    /// Items fetched from the store per round trip while writing
    pub batch_size: usize,
    /// File extensions recognized as media when scanning content
    pub media_extensions: Vec<String>,
    /// Comment types never exported (private notes, grades)
    pub excluded_comment_types: Vec<String>,
    /// Bundle attachment files into the archive
    pub include_media: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(".modmigrate/exports"),
            batch_size: 20,
            media_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "pdf", "doc", "docx", "ppt", "pptx", "xls",
                "xlsx",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_comment_types: vec!["private".to_string(), "grade".to_string()],
            include_media: true,
        }
    }
}
