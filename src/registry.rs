//! Image pull/push boundary
//!
//! The engine only needs two operations from a registry: make a base
//! image available locally, and publish a finished build. The wire
//! protocol is out of scope; the default implementation resolves
//! everything against the local repository index.

use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::image::ImageStore;
use async_trait::async_trait;
use tracing::info;

/// Pull/push operations a build pipeline depends on
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Ensure the named image is available locally
    async fn pull_if_absent(&self, name: &str) -> StrataResult<()>;

    /// Publish a finished image
    async fn push(&self, name: &str) -> StrataResult<()>;
}

/// Registry backed solely by the local store
pub struct LocalImageService {
    images: ImageStore,
}

impl LocalImageService {
    pub fn new(layout: Layout) -> Self {
        Self {
            images: ImageStore::new(layout),
        }
    }
}

#[async_trait]
impl ImageService for LocalImageService {
    async fn pull_if_absent(&self, name: &str) -> StrataResult<()> {
        if self.images.contains(name).await? {
            info!("base image {name} present locally");
            return Ok(());
        }
        Err(StrataError::ImageNotFound {
            name: name.to_string(),
        })
    }

    async fn push(&self, name: &str) -> StrataResult<()> {
        if !self.images.contains(name).await? {
            return Err(StrataError::ImageNotFound {
                name: name.to_string(),
            });
        }
        info!("image {name} retained in local store; no remote registry configured");
        Ok(())
    }
}
