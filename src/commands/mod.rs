pub mod export;
pub mod import;
pub mod init;

use anyhow::{Context, Result};
use modmigrate::config::Config;
use modmigrate::store::MemoryStore;

/// Open the configured store snapshot, starting an empty one if none exists
pub fn open_store(config: &Config) -> Result<MemoryStore> {
    let store = MemoryStore::load(
        &config.store.path,
        config.store.site_info(),
        &config.store.media_dir,
    )
    .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;
    Ok(store.with_image_sizes(config.store.image_sizes()))
}

/// Write the store snapshot back
pub fn save_store(config: &Config, store: &MemoryStore) -> Result<()> {
    store
        .save(&config.store.path)
        .with_context(|| format!("Failed to save store {}", config.store.path.display()))
}
