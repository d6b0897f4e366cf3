//! Configuration schema for Strata
//!
//! Configuration is stored at `~/.config/strata/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Layer and image storage settings
    pub storage: StorageConfig,

    /// Cloud build settings
    pub cloud: CloudConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the state root (layers, images, tmp). Defaults to
    /// `$STRATA_HOME`, then `~/.local/share/strata`.
    pub root: Option<PathBuf>,
}

/// Cloud build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Working directory on the remote build host
    pub remote_workdir: String,

    /// Path to the strata binary on the remote build host
    pub remote_bin: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            remote_workdir: "/var/lib/strata/workdir".to_string(),
            remote_bin: "/usr/local/bin/strata".to_string(),
        }
    }
}
