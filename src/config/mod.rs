//! Configuration module for livetiming-rs
//!
//! Settings live in a single TOML file:
//! - **Linux**: `~/.config/livetiming-rs/config.toml`
//! - **macOS**: `~/Library/Application Support/livetiming-rs/config.toml`
//! - **Windows**: `%APPDATA%\livetiming-rs\config.toml`
//!
//! Every section is optional; missing keys take their defaults.
//!
//! # Example
//!
//! ```ignore
//! use livetiming_rs::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default();
//! config.playback.delay_ms = 30_000;
//! config.save()?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{LiveTimingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config and data directories
pub const APP_ID: &str = "livetiming-rs";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Captures directory under the app data directory
pub const CAPTURES_DIR: &str = "captures";

// ==================== Directories ====================

/// Directory holding the config file
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the config file
pub fn config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Default location for session captures
pub fn default_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID).join(CAPTURES_DIR))
}

// ==================== App Config ====================

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where session captures are written and listed; platform data dir when unset
    pub data_directory: Option<PathBuf>,
    /// Enables a daily rolling log file in this directory
    pub log_directory: Option<PathBuf>,
    pub playback: PlaybackConfig,
    pub feed: FeedConfig,
    pub channels: ChannelConfig,
}

impl AppConfig {
    /// Load config from the default location; a missing file yields defaults
    pub fn load() -> Result<Self> {
        let path = config_path().ok_or_else(|| {
            LiveTimingError::Config("Could not determine config path".to_string())
        })?;
        Self::load_from(&path)
    }

    /// Load config from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            LiveTimingError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            LiveTimingError::Config(format!("Failed to parse config {:?}: {}", path, e))
        })
    }

    /// Load config, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        let path = config_path().ok_or_else(|| {
            LiveTimingError::Config("Could not determine config path".to_string())
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LiveTimingError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| LiveTimingError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| LiveTimingError::Config(format!("Failed to write config: {}", e)))
    }

    /// Resolved captures directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        self.data_directory
            .clone()
            .or_else(default_data_dir)
            .ok_or_else(|| {
                LiveTimingError::Config("Could not determine data directory".to_string())
            })
    }
}

// ==================== Utility Functions ====================

/// Format a file size for display
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{} bytes", b),
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.data_directory = Some(dir.path().join("captures"));
        config.playback.delay_ms = 45_000;
        config.channels.command_buffer = 8;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.data_dir().unwrap(), dir.path().join("captures"));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[playback]\ndelay_ms = 1500\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.playback.delay_ms, 1500);
        assert_eq!(config.playback.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(config.feed, FeedConfig::default());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "playback = 3").unwrap();

        assert!(matches!(
            AppConfig::load_from(&path),
            Err(LiveTimingError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_path_follows_xdg_config_home() {
        if !cfg!(target_os = "linux") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let previous = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", dir.path());

        let path = config_path();

        match previous {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
        assert_eq!(path, Some(dir.path().join(APP_ID).join(CONFIG_FILE)));
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(500), "500 bytes");
        assert_eq!(format_file_size(1024), "1.00 KB");
        assert_eq!(format_file_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_file_size(2 * 1024 * 1024 * 1024), "2.00 GB");
    }
}
