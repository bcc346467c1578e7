//! Configuration file loading for Bundleyard
//!
//! This module handles loading and saving configuration from TOML files.
//! Every option has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::fs;
use serde::{Deserialize, Serialize};

use crate::ingest::IngestConfig;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading or saving
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(String),
    #[error("Config file not found")]
    NotFound,
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Main configuration structure for Bundleyard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleyardConfig {
    /// Bundle ingestion settings
    #[serde(default)]
    pub ingest: IngestSection,
    /// Socket server settings
    #[serde(default)]
    pub server: ServerSection,
}

/// Bundle ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    /// Directory under which every project is materialized
    #[serde(default = "default_projects_root")]
    pub projects_root: String,
    /// Largest accepted archive, in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
}

/// Socket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Path to Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    /// Largest accepted request frame, in bytes
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u64,
}

// Default value functions

fn default_projects_root() -> String {
    "/usr/local/appjail-projects".to_string()
}

fn default_max_payload_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_socket_path() -> String {
    "/var/run/bundleyard.sock".to_string()
}

fn default_max_frame_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl BundleyardConfig {
    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConfigError::NotFound
                } else {
                    ConfigError::Io(e)
                }
            })?;

        let config: BundleyardConfig = toml::from_str(&contents)
            .map_err(|e| ConfigError::TomlParse(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Searches in the following order:
    /// 1. `/usr/local/etc/bundleyard/config.toml`
    /// 2. `~/.config/bundleyard/config.toml`
    ///
    /// If neither exists, returns default configuration.
    pub fn load_defaults() -> Result<Self> {
        let system_config = Path::new("/usr/local/etc/bundleyard/config.toml");
        let user_config = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".config/bundleyard/config.toml"))
            .unwrap_or_else(|_| PathBuf::from("~/.config/bundleyard/config.toml"));

        if system_config.exists() {
            return Self::load(system_config);
        }

        if user_config.exists() {
            return Self::load(user_config);
        }

        Ok(Self::default())
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        fs::write(path, toml_string)?;

        Ok(())
    }

    /// Ingestor settings derived from this configuration
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            projects_root: PathBuf::from(&self.ingest.projects_root),
            max_payload_bytes: self.ingest.max_payload_bytes,
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.ingest.projects_root.is_empty() {
            return Err(ConfigError::InvalidValue("Projects root cannot be empty".to_string()));
        }

        if self.ingest.max_payload_bytes == 0 {
            return Err(ConfigError::InvalidValue("Maximum payload size cannot be zero".to_string()));
        }

        if self.server.socket_path.is_empty() {
            return Err(ConfigError::InvalidValue("Socket path cannot be empty".to_string()));
        }

        // Uploads travel hex-encoded, so a frame must hold at least twice the payload
        if self.server.max_frame_bytes < self.ingest.max_payload_bytes.saturating_mul(2) {
            return Err(ConfigError::InvalidValue(format!(
                "Maximum frame size {} is too small for payloads of {} bytes",
                self.server.max_frame_bytes, self.ingest.max_payload_bytes
            )));
        }

        Ok(())
    }
}
