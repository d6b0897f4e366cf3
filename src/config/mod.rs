//! Configuration management and on-disk layout

pub mod schema;

pub use schema::Config;

use crate::error::{StrataError, StrataResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata")
            .join("config.toml")
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> StrataResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
            StrataError::io(
                format!("reading config from {}", self.config_path.display()),
                e,
            )
        })?;

        toml::from_str(&content).map_err(|e| StrataError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk layout of the strata state directory.
///
/// Everything the builder persists lives under one root:
/// `layers/<digest>/` for resolved layer directories, `images/<id>.yaml`
/// sidecar metadata documents plus the `images/repository.json` name
/// index, and `tmp/` for per-build scratch space.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Create a layout rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the default state root: `$STRATA_HOME`, the configured
    /// storage root, then `~/.local/share/strata`.
    pub fn resolve(config: &Config) -> Self {
        if let Ok(home) = std::env::var("STRATA_HOME") {
            return Self::new(home);
        }
        if let Some(ref root) = config.storage.root {
            return Self::new(root.clone());
        }
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata");
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one subdirectory per stored layer, named by digest
    pub fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    /// Resolved directory of a single layer
    pub fn layer_path(&self, digest: &str) -> PathBuf {
        self.layers_dir().join(digest)
    }

    /// Directory holding image metadata sidecar documents
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Metadata sidecar document for one image, named by image id
    pub fn image_manifest_path(&self, id: &str) -> PathBuf {
        self.images_dir().join(format!("{id}.yaml"))
    }

    /// The name -> id repository index
    pub fn repository_index_path(&self) -> PathBuf {
        self.images_dir().join("repository.json")
    }

    /// Per-build scratch space
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Allocate a fresh uniquely-named scratch directory
    pub async fn mk_tmp_dir(&self, prefix: &str) -> StrataResult<PathBuf> {
        let dir = self
            .tmp_dir()
            .join(format!("{prefix}-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StrataError::io(format!("creating tmp dir {}", dir.display()), e))?;
        Ok(dir)
    }

    /// Create the layout's directories if missing
    pub async fn ensure(&self) -> StrataResult<()> {
        for dir in [self.layers_dir(), self.images_dir(), self.tmp_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| StrataError::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(())
    }
}
