//! Logging configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Log output format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Log severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl LoggingConfig {
    /// Level after applying `-v` flags: each flag lowers the threshold one step
    pub fn effective_level(&self, verbose: u8) -> LogLevel {
        match verbose {
            0 => self.level,
            1 => self.level.min(LogLevel::Debug),
            _ => LogLevel::Trace,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: LogLevel::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_flags_lower_level() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.effective_level(0), LogLevel::Info);
        assert_eq!(cfg.effective_level(1), LogLevel::Debug);
        assert_eq!(cfg.effective_level(3), LogLevel::Trace);

        let quiet = LoggingConfig {
            level: LogLevel::Warn,
            ..LoggingConfig::default()
        };
        assert_eq!(quiet.effective_level(1), LogLevel::Debug);
    }
}
