//! Content store configuration

use crate::store::SiteInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Content store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store snapshot file
    pub path: PathBuf,
    /// Directory holding media files
    pub media_dir: PathBuf,
    /// Site title used when the snapshot does not exist yet
    pub site_title: String,
    /// Site URL used when the snapshot does not exist yet
    pub site_url: String,
    /// Base URL under which `media_dir` is served
    pub uploads_url: String,
    /// Derived image sizes generated for imported attachments
    #[serde(default = "default_image_sizes")]
    pub image_sizes: Vec<[u32; 2]>,
}

fn default_image_sizes() -> Vec<[u32; 2]> {
    vec![[150, 150], [300, 200]]
}

impl StoreConfig {
    /// Site information for a fresh store
    pub fn site_info(&self) -> SiteInfo {
        SiteInfo {
            title: self.site_title.clone(),
            url: self.site_url.clone(),
            uploads_url: self.uploads_url.clone(),
            ..SiteInfo::default()
        }
    }

    pub fn image_sizes(&self) -> Vec<(u32, u32)> {
        self.image_sizes.iter().map(|[w, h]| (*w, *h)).collect()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".modmigrate/store.json"),
            media_dir: PathBuf::from(".modmigrate/uploads"),
            site_title: "Modules".to_string(),
            site_url: "http://localhost".to_string(),
            uploads_url: "http://localhost/uploads".to_string(),
            image_sizes: default_image_sizes(),
        }
    }
}
