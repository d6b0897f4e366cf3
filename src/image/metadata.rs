//! Image metadata persistence
//!
//! Every built image is described by a YAML sidecar document under the
//! images directory, named by the image's id. A small JSON index maps
//! image names to ids, so names can be re-pointed at new builds while old
//! documents stay addressable.

use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::image::Layer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::fs;
use tracing::debug;

/// Annotation key carrying the cluster definition discovered at build time
pub const CLUSTERFILE_ANNOTATION: &str = "strata.io/clusterfile";

/// A built (or building) cluster image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Unique image id, generated per build
    pub id: String,

    /// Image name as given to the build
    pub name: String,

    /// When the build produced this image
    pub created: DateTime<Utc>,

    /// Free-form metadata attached to the image
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Ordered layer list. In stored images the FROM layer has been
    /// squashed away: the base image's own layers appear inline instead.
    pub layers: Vec<Layer>,
}

impl Image {
    /// Create a new image spec for a build
    pub fn new(name: impl Into<String>, layers: Vec<Layer>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            created: Utc::now(),
            annotations: BTreeMap::new(),
            layers,
        }
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }
}

/// Reads and writes image metadata documents and the repository index
#[derive(Debug, Clone)]
pub struct ImageStore {
    layout: Layout,
}

impl ImageStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Persist an image document and point its name at it in the index
    pub async fn save(&self, image: &Image) -> StrataResult<()> {
        let path = self.layout.image_manifest_path(&image.id);
        let doc = serde_yaml::to_string(image)?;
        fs::write(&path, doc)
            .await
            .map_err(|e| StrataError::io(format!("writing {}", path.display()), e))?;

        let mut index = self.read_index().await?;
        index.insert(image.name.clone(), image.id.clone());
        self.write_index(&index).await?;
        debug!("saved image {} as {}", image.name, image.id);
        Ok(())
    }

    /// Load an image document by id
    pub async fn by_id(&self, id: &str) -> StrataResult<Image> {
        let path = self.layout.image_manifest_path(id);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
        serde_yaml::from_str(&content).map_err(|e| StrataError::MetadataInvalid {
            path,
            reason: e.to_string(),
        })
    }

    /// Load an image document by name via the repository index
    pub async fn by_name(&self, name: &str) -> StrataResult<Image> {
        let index = self.read_index().await?;
        let id = index.get(name).ok_or_else(|| StrataError::ImageNotFound {
            name: name.to_string(),
        })?;
        self.by_id(id).await
    }

    /// Whether the index knows this image name
    pub async fn contains(&self, name: &str) -> StrataResult<bool> {
        Ok(self.read_index().await?.contains_key(name))
    }

    /// All (name, id) pairs in the repository index
    pub async fn list(&self) -> StrataResult<Vec<(String, String)>> {
        Ok(self.read_index().await?.into_iter().collect())
    }

    async fn read_index(&self) -> StrataResult<BTreeMap<String, String>> {
        let path = self.layout.repository_index_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_index(&self, index: &BTreeMap<String, String>) -> StrataResult<()> {
        let path = self.layout.repository_index_path();
        let content = serde_json::to_string_pretty(index)?;
        fs::write(&path, content)
            .await
            .map_err(|e| StrataError::io(format!("writing {}", path.display()), e))
    }
}
