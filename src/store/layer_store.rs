//! Content-addressed layer storage
//!
//! Persists layer directories under the layout's layer root, one
//! subdirectory per digest. Registration is idempotent: a layer whose
//! digest is already present is not copied again.

use crate::build::hasher;
use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::fsutil;
use std::path::PathBuf;
use tracing::debug;

/// Handle to the on-disk layer store
#[derive(Debug, Clone)]
pub struct LayerStore {
    layout: Layout,
}

impl LayerStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Canonicalize and persist a directory's contents, returning the
    /// content digest. The empty-content sentinel is returned without
    /// storing anything; callers treat it as "no layer produced".
    ///
    /// Hashing and storage are atomic from the caller's perspective: the
    /// content is staged under a temporary name and renamed into place.
    pub fn register(&self, dir: &std::path::Path) -> StrataResult<String> {
        let digest = hasher::canonical_digest(dir)?;
        if hasher::is_empty_digest(&digest) {
            debug!("no content in {}, skipping registration", dir.display());
            return Ok(digest);
        }

        let dest = self.layout.layer_path(&digest);
        if dest.exists() {
            debug!("layer {} already present", digest);
            return Ok(digest);
        }

        let staging = self
            .layout
            .layers_dir()
            .join(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        fsutil::copy_tree(dir, &staging)?;
        match std::fs::rename(&staging, &dest) {
            Ok(()) => {}
            // Lost a race with a concurrent registration of the same digest
            Err(_) if dest.exists() => {
                let _ = std::fs::remove_dir_all(&staging);
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(StrataError::io(
                    format!("placing layer {}", dest.display()),
                    e,
                ));
            }
        }

        debug!("registered layer {}", digest);
        Ok(digest)
    }

    /// Whether a layer with this digest is stored
    pub fn contains(&self, digest: &str) -> bool {
        self.layout.layer_path(digest).is_dir()
    }

    /// Resolved directory of a stored layer
    pub fn path_of(&self, digest: &str) -> StrataResult<PathBuf> {
        let path = self.layout.layer_path(digest);
        if !path.is_dir() {
            return Err(StrataError::LayerMissing {
                digest: digest.to_string(),
            });
        }
        Ok(path)
    }
}
