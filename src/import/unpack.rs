//! Archive extraction and sanitising
//!
//! An upload is accepted only with an allowed extension. It is extracted into
//! a fresh directory, entries that would land outside that directory are
//! refused, and every extracted file whose extension is not on the safe list
//! is deleted again. The document and readme are kept by name.

use super::types::ImportError;
use crate::archive::{DOCUMENT_NAME, README_NAME};
use crate::config::ImportConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Result of unpacking an upload
#[derive(Debug, Clone)]
pub struct UnpackedArchive {
    /// Directory the archive was extracted into
    pub root: PathBuf,
    /// The serialized document
    pub document: PathBuf,
    /// The manifest, when the archive had one
    pub readme: Option<PathBuf>,
    /// Files written by extraction
    pub files_extracted: usize,
    /// Files deleted because of their extension, relative to `root`
    pub files_removed: Vec<PathBuf>,
}

/// Extracts uploaded archives
#[derive(Debug, Clone)]
pub struct ArchiveUnpacker {
    archive_extensions: Vec<String>,
    safe_extensions: Vec<String>,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

impl ArchiveUnpacker {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            archive_extensions: config
                .archive_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            safe_extensions: config
                .safe_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Check the upload's extension
    pub fn validate_upload(&self, upload: &Path) -> Result<(), ImportError> {
        match extension_of(upload) {
            Some(ext) if self.archive_extensions.contains(&ext) => Ok(()),
            _ => Err(ImportError::UnsupportedFileType(
                upload
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| upload.display().to_string()),
            )),
        }
    }

    /// Extract `upload` into `dest` and sanitise the result
    pub fn unpack(&self, upload: &Path, dest: &Path) -> Result<UnpackedArchive, ImportError> {
        self.validate_upload(upload)?;
        std::fs::create_dir_all(dest)?;

        let files_extracted = match extract(upload, dest) {
            Ok(count) => count,
            Err(e) => {
                self.discard_partial(dest);
                return Err(e);
            }
        };
        let files_removed = purge_unsafe_files(dest, &self.safe_extensions)?;

        let document = dest.join(DOCUMENT_NAME);
        if !document.is_file() {
            return Err(ImportError::InvalidFormat(format!(
                "archive has no {}",
                DOCUMENT_NAME
            )));
        }
        let readme = Some(dest.join(README_NAME)).filter(|p| p.is_file());

        info!(
            "Unpacked {} ({} files, {} removed)",
            upload.display(),
            files_extracted,
            files_removed.len()
        );
        Ok(UnpackedArchive {
            root: dest.to_path_buf(),
            document,
            readme,
            files_extracted,
            files_removed,
        })
    }

    /// Sanitise whatever a failed extraction left in `dest`
    fn discard_partial(&self, dest: &Path) {
        match purge_unsafe_files(dest, &self.safe_extensions) {
            Ok(removed) if !removed.is_empty() => {
                warn!(
                    "Removed {} disallowed files left by a failed extraction",
                    removed.len()
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Could not sanitise {} ({}), removing it", dest.display(), e);
                if let Err(e) = std::fs::remove_dir_all(dest) {
                    warn!("Failed to remove {}: {}", dest.display(), e);
                }
            }
        }
    }
}

#[cfg(feature = "archive")]
fn extract(upload: &Path, dest: &Path) -> Result<usize, ImportError> {
    use zip::ZipArchive;

    let file = std::fs::File::open(upload)
        .map_err(|e| ImportError::CorruptArchive(format!("{}: {}", upload.display(), e)))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| ImportError::CorruptArchive(format!("{}: {}", upload.display(), e)))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ImportError::CorruptArchive(format!("entry {}: {}", i, e)))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Refusing archive entry outside the target directory: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|e| ImportError::CorruptArchive(format!("{}: {}", out_path.display(), e)))?;
        written += 1;
    }
    Ok(written)
}

#[cfg(not(feature = "archive"))]
fn extract(_upload: &Path, _dest: &Path) -> Result<usize, ImportError> {
    Err(ImportError::Unavailable(
        "built without the `archive` feature".to_string(),
    ))
}

/// Delete every file under `root` whose extension is not in `safe_extensions`.
///
/// The document and readme are exempt by name. Returns the removed paths
/// relative to `root`.
pub fn purge_unsafe_files(
    root: &Path,
    safe_extensions: &[String],
) -> Result<Vec<PathBuf>, ImportError> {
    let mut removed = Vec::new();
    for entry in WalkDir::new(root).into_iter() {
        let entry = entry.map_err(|e| ImportError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if relative == Path::new(DOCUMENT_NAME) || relative == Path::new(README_NAME) {
            continue;
        }
        let safe = extension_of(path)
            .map(|ext| safe_extensions.iter().any(|s| *s == ext))
            .unwrap_or(false);
        if !safe {
            debug!("Removing disallowed file {}", relative.display());
            std::fs::remove_file(path)?;
            removed.push(relative.to_path_buf());
        }
    }
    Ok(removed)
}
