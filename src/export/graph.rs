//! Content graph reader: which entities make up one module export

use super::ExportError;
use crate::config::ExportConfig;
use crate::store::{ContentStore, META_THUMBNAIL_ID};
use crate::types::{PostId, PostKind};
use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

static RE_SIZE_SUFFIX: OnceLock<Regex> = OnceLock::new();

/// One module plus everything linked to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportUnit {
    pub module: PostId,
    /// Pages in module order
    pub pages: Vec<PostId>,
    /// Attachments referenced by content or as featured images
    pub attachments: BTreeSet<PostId>,
}

impl ExportUnit {
    /// All post ids in the order they are written: module, pages, attachments
    pub fn post_ids(&self) -> Vec<PostId> {
        let mut ids = Vec::with_capacity(1 + self.pages.len() + self.attachments.len());
        ids.push(self.module);
        ids.extend(self.pages.iter().copied());
        ids.extend(self.attachments.iter().copied());
        ids
    }
}

/// Strip a `-WIDTHxHEIGHT` suffix before the extension, if present
pub fn strip_size_suffix(url: &str) -> Option<String> {
    let re = RE_SIZE_SUFFIX.get_or_init(|| Regex::new(r"-\d+x\d+(\.[A-Za-z0-9]+)$").unwrap());
    re.is_match(url).then(|| re.replace(url, "$1").into_owned())
}

/// Reads the content graph of a module from the store
pub struct ContentGraphReader<'a, S: ContentStore + ?Sized> {
    store: &'a S,
    media_re: Regex,
}

impl<'a, S: ContentStore + ?Sized> ContentGraphReader<'a, S> {
    pub fn new(store: &'a S, config: &ExportConfig) -> Result<Self, ExportError> {
        let uploads = store.site_info().uploads_url;
        let extensions = config
            .media_extensions
            .iter()
            .map(|e| regex_lite::escape(e.trim_start_matches('.')))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r#"(?i){}/[^\s"'<>()]+?\.(?:{})\b"#,
            regex_lite::escape(uploads.trim_end_matches('/')),
            extensions
        );
        let media_re = Regex::new(&pattern)
            .map_err(|e| ExportError::Xml(format!("invalid media pattern: {}", e)))?;
        Ok(Self { store, media_re })
    }

    /// Build the export unit of `module`
    pub fn read(&self, module: PostId) -> Result<ExportUnit, ExportError> {
        let post = self
            .store
            .post(module)?
            .filter(|p| p.kind == PostKind::Module)
            .ok_or_else(|| ExportError::NotFound(format!("module {}", module)))?;

        let wanted = post.module_pages();
        let found = self.store.posts(&wanted)?;
        let pages: Vec<PostId> = wanted
            .iter()
            .copied()
            .filter(|id| {
                let exists = found.iter().any(|p| p.id == *id);
                if !exists {
                    warn!("Module {} lists page {} which no longer exists", module, id);
                }
                exists
            })
            .collect();

        let mut attachments = BTreeSet::new();
        for p in std::iter::once(&post).chain(found.iter()) {
            for text in [&p.content, &p.excerpt] {
                for url in self.media_urls(text) {
                    match self.resolve_media(url)? {
                        Some(id) => {
                            attachments.insert(id);
                        }
                        None => debug!("No attachment found for {}", url),
                    }
                }
            }
            if let Some(thumb) = p
                .meta(META_THUMBNAIL_ID)
                .and_then(|v| v.trim().parse::<u64>().ok())
            {
                match self.store.post(PostId(thumb))? {
                    Some(a) if a.kind == PostKind::Attachment => {
                        attachments.insert(a.id);
                    }
                    _ => warn!("Featured image {} of post {} is missing", thumb, p.id),
                }
            }
        }

        Ok(ExportUnit {
            module,
            pages,
            attachments,
        })
    }

    /// Media URLs under the uploads base found in `text`
    pub fn media_urls<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.media_re.find_iter(text).map(|m| m.as_str()).collect()
    }

    /// Resolve a media URL: exact match, then without a size suffix, then by
    /// file name
    pub fn resolve_media(&self, url: &str) -> Result<Option<PostId>, ExportError> {
        if let Some(id) = self.store.attachment_by_url(url)? {
            return Ok(Some(id));
        }
        let base = match strip_size_suffix(url) {
            Some(stripped) => {
                if let Some(id) = self.store.attachment_by_url(&stripped)? {
                    return Ok(Some(id));
                }
                stripped
            }
            None => url.to_string(),
        };
        let file_name = base.rsplit('/').next().unwrap_or(&base);
        let candidates = self.store.attachments_by_basename(file_name)?;
        if candidates.len() > 1 {
            debug!(
                "{} attachments named {}; using the first",
                candidates.len(),
                file_name
            );
        }
        Ok(candidates.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewPost, SiteInfo};
    use chrono::Utc;
    use tempfile::TempDir;

    fn attach(store: &mut MemoryStore, dir: &std::path::Path, relative: &str) -> PostId {
        let file_name = relative.rsplit('/').next().unwrap();
        let src = dir.join(file_name);
        std::fs::write(&src, b"media").unwrap();
        let now = Utc::now();
        let post = NewPost {
            kind: PostKind::Attachment,
            guid: String::new(),
            title: file_name.to_string(),
            content: String::new(),
            excerpt: String::new(),
            slug: file_name.to_string(),
            status: "inherit".to_string(),
            parent: None,
            author: None,
            date: now,
            modified: now,
            menu_order: 0,
            terms: Vec::new(),
        };
        store.insert_attachment(post, &src, relative).unwrap().0
    }

    #[test]
    fn test_resolve_media_falls_back_in_order() {
        let temp = TempDir::new().unwrap();
        let mut store = MemoryStore::new(SiteInfo::default(), temp.path().join("media"));
        let photo = attach(&mut store, temp.path(), "2024/05/photo.jpg");
        let diagram = attach(&mut store, temp.path(), "2023/01/diagram.png");
        let reader = ContentGraphReader::new(&store, &ExportConfig::default()).unwrap();

        // Exact URL
        assert_eq!(
            reader
                .resolve_media("http://localhost/uploads/2024/05/photo.jpg")
                .unwrap(),
            Some(photo)
        );
        // Derived size of a known original
        assert_eq!(
            reader
                .resolve_media("http://localhost/uploads/2024/05/photo-300x200.jpg")
                .unwrap(),
            Some(photo)
        );
        // Moved file, found by name
        assert_eq!(
            reader
                .resolve_media("http://localhost/uploads/old/diagram-150x150.png")
                .unwrap(),
            Some(diagram)
        );
        assert_eq!(
            reader
                .resolve_media("http://localhost/uploads/2024/05/missing.png")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_strip_size_suffix() {
        assert_eq!(
            strip_size_suffix("http://x/uploads/photo-300x200.jpg").as_deref(),
            Some("http://x/uploads/photo.jpg")
        );
        assert_eq!(strip_size_suffix("http://x/uploads/photo.jpg"), None);
        assert_eq!(
            strip_size_suffix("http://x/uploads/2024-01x/a-1x1.png").as_deref(),
            Some("http://x/uploads/2024-01x/a.png")
        );
    }
}
