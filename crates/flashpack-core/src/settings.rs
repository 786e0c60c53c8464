//! Persistent user settings for Flashpack
//!
//! Settings are stored in a TOML configuration file at:
//! - Linux/macOS: `~/.config/flashpack/flashpack_config.toml`
//! - Windows: `%APPDATA%\flashpack\flashpack_config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [generate]
//! block_size = "128K"
//! sector_size = 512
//! max_blank_blocks = 100
//! flash_update_version = "v1"
//! digest = "sha256"
//! platform_ids = "Contoso.Board.A;Contoso.Board.B"
//!
//! [behavior]
//! quiet = false
//! ```

use crate::catalog::DigestAlgorithm;
use crate::config::{
    parse_platform_ids, parse_size, GenerateConfig, DEFAULT_MAX_BLANK_BLOCKS, DEFAULT_SECTOR_SIZE,
};
use crate::error::Error;
use crate::format::FlashUpdateVersion;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "flashpack_config.toml";

/// Application name for config directory
const APP_NAME: &str = "flashpack";

/// Default block size string
const DEFAULT_BLOCK_SIZE_STR: &str = "128K";

/// User settings loaded from configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Container generation defaults
    pub generate: GenerateSettings,

    /// Behavior settings
    pub behavior: BehaviorSettings,
}

/// Defaults for `generate` when a flag is omitted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerateSettings {
    /// Block size (e.g., "128K", "1M")
    pub block_size: String,

    /// Device sector size in bytes
    pub sector_size: u32,

    /// Longest blank run left out of a container
    pub max_blank_blocks: u64,

    /// Flash update version ("v1" or "v2")
    pub flash_update_version: String,

    /// Catalog digest algorithm
    pub digest: String,

    /// Semicolon-delimited platform IDs
    pub platform_ids: String,
}

/// General behavior settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviorSettings {
    /// Whether to suppress non-error output
    pub quiet: bool,
}

impl Default for GenerateSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE_STR.to_string(),
            sector_size: DEFAULT_SECTOR_SIZE,
            max_blank_blocks: DEFAULT_MAX_BLANK_BLOCKS,
            flash_update_version: "v1".to_string(),
            digest: "sha256".to_string(),
            platform_ids: String::new(),
        }
    }
}

impl GenerateSettings {
    /// Build a generation config from these defaults
    pub fn to_config(&self) -> crate::Result<GenerateConfig> {
        let block_size = parse_size(&self.block_size)?;
        let block_size = u32::try_from(block_size)
            .map_err(|_| Error::Configuration(format!("block size too large: {}", self.block_size)))?;
        let version: FlashUpdateVersion = self.flash_update_version.parse()?;
        let digest: DigestAlgorithm = self.digest.parse()?;

        let mut config = GenerateConfig::new()
            .block_size(block_size)
            .sector_size(self.sector_size)
            .max_blank_blocks(self.max_blank_blocks)
            .flash_update_version(version)
            .digest_algorithm(digest);
        if !self.platform_ids.trim().is_empty() {
            config = config.platform_ids(parse_platform_ids(&self.platform_ids)?);
        }
        Ok(config)
    }
}

impl Settings {
    /// Load settings from the configuration file
    ///
    /// Returns default settings if the file doesn't exist or can't be parsed
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            tracing::debug!("No config path available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::read(&path) {
            Ok(settings) => {
                tracing::debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                tracing::warn!("{}", e);
                Self::default()
            }
        }
    }

    /// Read and parse a settings file, reporting failures
    pub fn read(path: &std::path::Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(SettingsError::Deserialize)
    }

    /// Save settings to the configuration file
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path
    pub fn save_to_path(&self, path: Option<PathBuf>) -> Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;

        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Get the path to the configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Check if a configuration file exists
    pub fn config_exists() -> bool {
        Self::config_path().is_some_and(|p| p.exists())
    }

    /// Generate a default configuration file content as a string
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate default config"))
    }
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Failed to read or write config file
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),

    /// Failed to deserialize settings
    #[error("Failed to parse settings: {0}")]
    Deserialize(toml::de::Error),
}
