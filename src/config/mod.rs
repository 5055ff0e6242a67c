//! Configuration for modmigrate

mod export;
mod import;
mod logging;
mod store;

pub use export::ExportConfig;
pub use import::ImportConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use store::StoreConfig;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "modmigrate.toml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Content store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Export configuration
    #[serde(default)]
    pub export: ExportConfig,
    /// Import configuration
    #[serde(default)]
    pub import: ImportConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every error and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Store validation
        if self.store.path.as_os_str().is_empty() {
            errors.push("store path must not be empty".to_string());
        }
        if url::Url::parse(&self.store.uploads_url).is_err() {
            errors.push(format!(
                "uploads_url must be an absolute URL, got '{}'",
                self.store.uploads_url
            ));
        }
        if self.store.image_sizes.iter().any(|[w, h]| *w == 0 || *h == 0) {
            errors.push("image sizes must have positive width and height".to_string());
        }

        // Export validation
        if self.export.batch_size == 0 {
            errors.push("export batch_size must be positive".to_string());
        }
        if self.export.media_extensions.is_empty() {
            errors.push("export media_extensions must not be empty".to_string());
        }

        // Import validation
        if self.import.archive_extensions.is_empty() {
            errors.push("import archive_extensions must not be empty".to_string());
        }
        if self.import.max_media_size == 0 {
            errors.push("import max_media_size must be positive".to_string());
        }
        if self.import.fetch_timeout_secs == 0 {
            errors.push("import fetch_timeout_secs must be positive".to_string());
        }
        if self.import.max_records == Some(0) {
            errors.push("import max_records must be positive when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(valid_config().validate().is_ok(), "default config should be valid");
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut cfg = valid_config();
        cfg.export.batch_size = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size must be positive"));
    }

    #[test]
    fn validate_rejects_relative_uploads_url() {
        let mut cfg = valid_config();
        cfg.store.uploads_url = "/uploads".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("uploads_url must be an absolute URL"));
    }

    #[test]
    fn validate_reports_all_errors_together() {
        let mut cfg = valid_config();
        cfg.export.batch_size = 0;
        cfg.import.max_media_size = 0;
        cfg.import.archive_extensions.clear();
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("batch_size"));
        assert!(msg.contains("max_media_size"));
        assert!(msg.contains("archive_extensions"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [import]
            work_dir = "/tmp/imports"
            archive_extensions = ["zip"]
            safe_extensions = ["jpg"]
            prefetch_existing = false
            create_users = false
            fetch_remote_media = false
            max_media_size = 1024
            fetch_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert!(!cfg.import.prefetch_existing);
        assert_eq!(cfg.export.batch_size, 20);
        assert_eq!(cfg.logging.level, LogLevel::Info);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = valid_config();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.export.batch_size, cfg.export.batch_size);
        assert_eq!(parsed.store.image_sizes, cfg.store.image_sizes);
    }
}
