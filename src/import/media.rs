//! Attachment media retrieval
//!
//! An attachment's bytes come from the extracted archive when the file was
//! bundled at its uploads-relative path. Otherwise they are downloaded from
//! the source site, with the response checked against the declared length,
//! the configured size limit and the checksum recorded at export.

use crate::store::{DerivedSize, SizeEntry};
use crate::util::sha256_file;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while retrieving attachment media
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote server returned status {0}")]
    Status(u16),

    #[error("Size mismatch: declared {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Media too large: {0} bytes")]
    TooLarge(u64),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media not available: {0}")]
    NotAvailable(String),
}

/// Downloads a remote file into a local path
pub trait MediaFetcher: Send {
    /// Write the body of `url` to `dest`, returning the number of bytes written
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MediaError>;
}

/// Blocking HTTP fetcher with a size cap.
///
/// Must not be created or dropped on an async executor thread; the import
/// service runs the coordinator under `spawn_blocking`.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    max_size: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_size: u64) -> Result<Self, MediaError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("modmigrate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, max_size })
    }
}

impl MediaFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, MediaError> {
        let response = self.client.get(url).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Status(status.as_u16()));
        }

        let declared = response.content_length();
        if let Some(len) = declared {
            if len > self.max_size {
                return Err(MediaError::TooLarge(len));
            }
        }

        // Read at most one byte past the cap so oversize bodies without a
        // declared length are still caught
        let mut body = response.take(self.max_size + 1);
        let mut file = std::fs::File::create(dest)?;
        let written = std::io::copy(&mut body, &mut file)?;
        file.flush()?;

        if written > self.max_size {
            return Err(MediaError::TooLarge(written));
        }
        if let Some(expected) = declared {
            if expected != written {
                return Err(MediaError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }
        Ok(written)
    }
}

/// A media file ready to hand to the store
pub struct ResolvedMedia {
    /// Local path of the bytes
    pub path: PathBuf,
    /// Uploads-relative path the file should be stored under
    pub relative_path: String,
    /// Whether the bytes came from the archive rather than the network
    pub bundled: bool,
}

/// Resolves attachment URLs to local files for one import run
pub struct MediaResolver {
    /// Extracted archive directory
    archive_dir: Option<PathBuf>,
    /// Uploads base URL of the source site
    source_uploads_url: String,
    fetcher: Option<Box<dyn MediaFetcher>>,
    /// Staging directory for downloads, removed on drop
    staging: TempDir,
    downloads: usize,
}

impl MediaResolver {
    pub fn new(
        archive_dir: Option<PathBuf>,
        source_uploads_url: impl Into<String>,
        fetcher: Option<Box<dyn MediaFetcher>>,
    ) -> Result<Self, MediaError> {
        Ok(Self {
            archive_dir,
            source_uploads_url: source_uploads_url.into(),
            fetcher,
            staging: tempfile::tempdir()?,
            downloads: 0,
        })
    }

    /// Set the source uploads base once the document header is known
    pub fn set_source_uploads_url(&mut self, url: impl Into<String>) {
        self.source_uploads_url = url.into();
    }

    /// Locate or download the file behind `url`, verifying `sha256` when given
    pub fn resolve(&mut self, url: &str, sha256: Option<&str>) -> Result<ResolvedMedia, MediaError> {
        let relative_path = relative_upload_path(url, &self.source_uploads_url);

        let bundled = self
            .archive_dir
            .as_ref()
            .map(|dir| dir.join(&relative_path))
            .filter(|p| p.is_file());

        let media = match bundled {
            Some(path) => {
                debug!("Using bundled copy of {}", url);
                ResolvedMedia {
                    path,
                    relative_path,
                    bundled: true,
                }
            }
            None => {
                let fetcher = self.fetcher.as_ref().ok_or_else(|| {
                    MediaError::NotAvailable(format!(
                        "{} is not bundled and remote fetching is disabled",
                        url
                    ))
                })?;
                self.downloads += 1;
                let file_name = relative_path.rsplit('/').next().unwrap_or("media");
                let dest = self
                    .staging
                    .path()
                    .join(format!("{}-{}", self.downloads, file_name));
                let bytes = fetcher.fetch(url, &dest)?;
                debug!("Downloaded {} ({} bytes)", url, bytes);
                ResolvedMedia {
                    path: dest,
                    relative_path,
                    bundled: false,
                }
            }
        };

        if let Some(expected) = sha256.filter(|s| !s.is_empty()) {
            let actual = sha256_file(&media.path)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(MediaError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(media)
    }
}

/// Path of `url` relative to the uploads base, or its file name when the URL
/// lives elsewhere. Query strings and fragments are dropped.
pub fn relative_upload_path(url: &str, uploads_base: &str) -> String {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    let base = uploads_base.trim_end_matches('/');
    if !base.is_empty() {
        if let Some(rest) = url.strip_prefix(base).and_then(|r| r.strip_prefix('/')) {
            if !rest.is_empty() && !rest.split('/').any(|seg| seg == "..") {
                return rest.to_string();
            }
        }
    }
    url.rsplit('/').next().unwrap_or(url).to_string()
}

/// Split a file name into stem and extension (without the dot)
fn split_ext(file: &str) -> (&str, Option<&str>) {
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file, None),
    }
}

/// Old-to-new URL pairs for an imported attachment and its derived sizes.
///
/// Source variants come from the `_attachment_sizes` metadata and from the
/// `-WIDTHxHEIGHT` naming convention applied to every size the destination
/// generated. A source variant maps to the destination variant of the same
/// dimensions, or to the new full-size URL when there is none.
pub fn derived_url_mappings(
    old_url: &str,
    new_url: &str,
    sizes_meta: Option<&str>,
    new_sizes: &[DerivedSize],
) -> Vec<(String, String)> {
    let mut mappings = vec![(old_url.to_string(), new_url.to_string())];
    let Some((old_dir, old_file)) = old_url.rsplit_once('/') else {
        return mappings;
    };

    let new_for = |width: u32, height: u32| {
        new_sizes
            .iter()
            .find(|s| s.width == width && s.height == height)
            .map(|s| s.url.clone())
            .unwrap_or_else(|| new_url.to_string())
    };

    let mut push = |old: String, new: String| {
        if !mappings.iter().any(|(o, _)| *o == old) {
            mappings.push((old, new));
        }
    };

    let recorded: Vec<SizeEntry> = sizes_meta
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    for entry in &recorded {
        push(
            format!("{}/{}", old_dir, entry.file),
            new_for(entry.width, entry.height),
        );
    }

    let (stem, ext) = split_ext(old_file);
    for size in new_sizes {
        let file = match ext {
            Some(ext) => format!("{}-{}x{}.{}", stem, size.width, size.height, ext),
            None => format!("{}-{}x{}", stem, size.width, size.height),
        };
        push(format!("{}/{}", old_dir, file), size.url.clone());
    }

    mappings
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FailingFetcher;

    impl MediaFetcher for FailingFetcher {
        fn fetch(&self, _url: &str, _dest: &Path) -> Result<u64, MediaError> {
            Err(MediaError::Status(404))
        }
    }

    #[test]
    fn test_relative_upload_path() {
        let base = "http://old.example/uploads";
        assert_eq!(
            relative_upload_path("http://old.example/uploads/2024/05/photo.jpg?ver=2", base),
            "2024/05/photo.jpg"
        );
        assert_eq!(
            relative_upload_path("http://cdn.example/img/photo.jpg", base),
            "photo.jpg"
        );
        assert_eq!(
            relative_upload_path("http://old.example/uploads/../etc/passwd", base),
            "passwd"
        );
    }

    #[test]
    fn test_bundled_file_preferred_over_fetch() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("2024/05");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("photo.jpg"), b"jpeg bytes").unwrap();

        let mut resolver = MediaResolver::new(
            Some(temp.path().to_path_buf()),
            "http://old.example/uploads",
            Some(Box::new(FailingFetcher)),
        )
        .unwrap();
        let media = resolver
            .resolve("http://old.example/uploads/2024/05/photo.jpg", None)
            .unwrap();
        assert!(media.bundled);
        assert_eq!(media.relative_path, "2024/05/photo.jpg");
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("doc.pdf"), b"pdf").unwrap();
        let mut resolver =
            MediaResolver::new(Some(temp.path().to_path_buf()), "http://old/uploads", None)
                .unwrap();
        let err = resolver
            .resolve("http://old/uploads/doc.pdf", Some("00ff"))
            .err()
            .unwrap();
        assert!(matches!(err, MediaError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_media_without_fetcher() {
        let mut resolver = MediaResolver::new(None, "http://old/uploads", None).unwrap();
        let err = resolver.resolve("http://old/uploads/a.png", None).err().unwrap();
        assert!(matches!(err, MediaError::NotAvailable(_)));
    }

    #[test]
    fn test_derived_size_mapping() {
        let new_sizes = vec![
            DerivedSize {
                width: 150,
                height: 150,
                url: "http://new/uploads/photo-150x150.jpg".to_string(),
            },
            DerivedSize {
                width: 300,
                height: 200,
                url: "http://new/uploads/photo-300x200.jpg".to_string(),
            },
        ];
        let meta = r#"[{"width":300,"height":200,"file":"photo-300x200.jpg"},
                       {"width":1024,"height":768,"file":"photo-1024x768.jpg"}]"#;
        let mappings = derived_url_mappings(
            "http://old/uploads/2024/photo.jpg",
            "http://new/uploads/photo.jpg",
            Some(meta),
            &new_sizes,
        );
        let lookup = |old: &str| {
            mappings
                .iter()
                .find(|(o, _)| o == old)
                .map(|(_, n)| n.as_str())
        };

        assert_eq!(
            lookup("http://old/uploads/2024/photo.jpg"),
            Some("http://new/uploads/photo.jpg")
        );
        assert_eq!(
            lookup("http://old/uploads/2024/photo-300x200.jpg"),
            Some("http://new/uploads/photo-300x200.jpg")
        );
        // No such size on the destination: falls back to full size
        assert_eq!(
            lookup("http://old/uploads/2024/photo-1024x768.jpg"),
            Some("http://new/uploads/photo.jpg")
        );
        // Naming convention only
        assert_eq!(
            lookup("http://old/uploads/2024/photo-150x150.jpg"),
            Some("http://new/uploads/photo-150x150.jpg")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_fetch_success_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-data".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/uploads/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let base = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            let temp = TempDir::new().unwrap();
            let fetcher = HttpFetcher::new(Duration::from_secs(5), 1024).unwrap();
            let dest = temp.path().join("a.png");
            let ok = fetcher.fetch(&format!("{}/uploads/a.png", base), &dest);
            let written = std::fs::read(&dest).unwrap();
            let missing = fetcher.fetch(&format!("{}/uploads/gone.png", base), &dest);
            (ok.unwrap(), written, missing)
        })
        .await
        .unwrap();

        assert_eq!(result.0, 8);
        assert_eq!(result.1, b"png-data");
        assert!(matches!(result.2, Err(MediaError::Status(404))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_fetch_rejects_oversize() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let url = format!("{}/uploads/big.pdf", server.uri());
        let err = tokio::task::spawn_blocking(move || {
            let temp = TempDir::new().unwrap();
            let fetcher = HttpFetcher::new(Duration::from_secs(5), 16).unwrap();
            fetcher.fetch(&url, &temp.path().join("big.pdf")).err()
        })
        .await
        .unwrap();

        assert!(matches!(err, Some(MediaError::TooLarge(64))));
    }
}
