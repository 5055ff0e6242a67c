use anyhow::Result;
use modmigrate::config::{Config, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;

pub async fn init_config(path: PathBuf) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        anyhow::bail!("Configuration already exists: {}", config_path.display());
    }

    let config = Config::default();
    let body = toml::to_string_pretty(&config)?;
    let content = format!("# modmigrate configuration\n\n{}", body);

    std::fs::create_dir_all(&path)?;
    std::fs::write(&config_path, content)?;
    println!("Created configuration file: {}", config_path.display());

    for dir in [&config.export.work_dir, &config.import.work_dir, &config.store.media_dir] {
        let dir = path.join(dir);
        std::fs::create_dir_all(&dir)?;
        println!("Created directory: {}", dir.display());
    }

    Ok(())
}
