//! Archive packaging
//!
//! The archive is written under a `.partial` name and renamed into place once
//! complete, so a failed export never leaves a truncated archive behind under
//! its final name.

use super::ExportError;
use crate::archive::{DOCUMENT_NAME, README_NAME};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of an archive that is still being written
pub const PARTIAL_SUFFIX: &str = ".partial";

/// A file to bundle, with its path inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub source: PathBuf,
    pub archive_path: String,
}

fn is_stale_artifact(name: &str) -> bool {
    name == DOCUMENT_NAME
        || name == README_NAME
        || name.ends_with(".zip")
        || name.ends_with(&format!(".zip{}", PARTIAL_SUFFIX))
}

/// Builds archives in one working directory
#[derive(Debug, Clone)]
pub struct ArchivePackager {
    work_dir: PathBuf,
}

impl ArchivePackager {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Delete archives, partial archives, documents and readmes left by
    /// earlier exports. Other files are left alone.
    pub fn purge_stale(&self) -> Result<usize, ExportError> {
        std::fs::create_dir_all(&self.work_dir)?;
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.work_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if is_stale_artifact(&name) {
                std::fs::remove_file(entry.path())?;
                debug!("Removed stale artifact {}", name);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Package `document`, the readme and `files` into `<work_dir>/<name>`
    pub fn package(
        &self,
        name: &str,
        document: &Path,
        readme: &str,
        files: &[MediaFile],
    ) -> Result<PathBuf, ExportError> {
        let target = self.work_dir.join(name);
        let partial = self.work_dir.join(format!("{}{}", name, PARTIAL_SUFFIX));

        if let Err(e) = write_zip(&partial, document, readme, files) {
            match std::fs::remove_file(&partial) {
                Ok(()) => {}
                Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
                Err(cleanup) => warn!("Failed to remove {}: {}", partial.display(), cleanup),
            }
            return Err(e);
        }
        std::fs::rename(&partial, &target)?;
        info!("Packaged {} ({} media files)", target.display(), files.len());
        Ok(target)
    }
}

#[cfg(feature = "archive")]
fn write_zip(
    path: &Path,
    document: &Path,
    readme: &str,
    files: &[MediaFile],
) -> Result<(), ExportError> {
    use std::collections::HashSet;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    let archive_err = |e: zip::result::ZipError| ExportError::Archive(e.to_string());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(std::fs::File::create(path)?);

    zip.start_file(DOCUMENT_NAME, options).map_err(archive_err)?;
    std::io::copy(&mut std::fs::File::open(document)?, &mut zip)?;

    zip.start_file(README_NAME, options).map_err(archive_err)?;
    zip.write_all(readme.as_bytes())?;

    let mut seen: HashSet<&str> = HashSet::new();
    for file in files {
        if !seen.insert(file.archive_path.as_str()) {
            continue;
        }
        zip.start_file(file.archive_path.as_str(), options)
            .map_err(archive_err)?;
        std::io::copy(&mut std::fs::File::open(&file.source)?, &mut zip)?;
    }

    zip.finish().map_err(archive_err)?;
    Ok(())
}

#[cfg(not(feature = "archive"))]
fn write_zip(
    _path: &Path,
    _document: &Path,
    _readme: &str,
    _files: &[MediaFile],
) -> Result<(), ExportError> {
    Err(ExportError::Unavailable(
        "built without the `archive` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_purge_stale_artifacts_only() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        for name in ["old.zip", "old.zip.partial", DOCUMENT_NAME, README_NAME, "notes.md"] {
            std::fs::write(dir.join(name), "x").unwrap();
        }

        let packager = ArchivePackager::new(dir);
        assert_eq!(packager.purge_stale().unwrap(), 4);
        assert!(dir.join("notes.md").exists());
        assert!(!dir.join("old.zip").exists());
    }

    #[cfg(feature = "archive")]
    #[test]
    fn test_package_writes_final_name_only() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        let document = dir.join(DOCUMENT_NAME);
        std::fs::write(&document, "<archive/>").unwrap();
        let media = dir.join("photo.jpg");
        std::fs::write(&media, b"jpeg").unwrap();

        let packager = ArchivePackager::new(dir);
        let files = vec![
            MediaFile {
                source: media.clone(),
                archive_path: "2024/05/photo.jpg".to_string(),
            },
            MediaFile {
                source: media,
                archive_path: "2024/05/photo.jpg".to_string(),
            },
        ];
        let path = packager
            .package("module.zip", &document, "readme", &files)
            .unwrap();

        assert!(path.is_file());
        assert!(!dir.join("module.zip.partial").exists());
        let archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
    }

    #[test]
    fn test_failed_package_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let packager = ArchivePackager::new(temp.path());
        let result = packager.package(
            "module.zip",
            &temp.path().join("missing.xml"),
            "readme",
            &[],
        );
        assert!(result.is_err());
        assert!(!temp.path().join("module.zip").exists());
        assert!(!temp.path().join("module.zip.partial").exists());
    }
}
