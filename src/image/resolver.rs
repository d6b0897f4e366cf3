//! Base image resolution
//!
//! A build's FROM layer establishes the base layer set: the ordered list
//! of already-stored layer directories every RUN/CMD mount builds upon.
//! Base chains are a single level deep; a base image that itself declares
//! a FROM base is rejected before any mount is attempted.

use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::image::{ImageStore, Layer, LayerKind};
use crate::store::{chain_over, LayerStore};
use std::path::PathBuf;

/// The resolved base of a build
#[derive(Debug, Clone, Default)]
pub struct ResolvedBase {
    /// The base image's own layers (empty for scratch)
    pub layers: Vec<Layer>,

    /// On-disk directories of the hashed base layers, in image order
    pub paths: Vec<PathBuf>,

    /// Chain identity over the base layers, seeding the build's cache
    /// chain
    pub parent_chain: String,
}

/// Resolve the FROM layer of a build into its base layer set.
pub async fn resolve_base(layout: &Layout, from: &Layer) -> StrataResult<ResolvedBase> {
    if from.kind != LayerKind::From {
        return Err(StrataError::Internal(format!(
            "resolve_base called with {} layer",
            from.kind
        )));
    }

    if from.is_scratch_from() {
        return Ok(ResolvedBase::default());
    }

    let image = ImageStore::new(layout.clone()).by_name(&from.value).await?;
    if image.layers.is_empty() {
        return Err(StrataError::BaseImageEmpty {
            name: from.value.clone(),
        });
    }
    if image.layers[0].kind == LayerKind::From {
        return Err(StrataError::BaseImageHasBase {
            name: from.value.clone(),
        });
    }

    let store = LayerStore::new(layout.clone());
    let mut paths = Vec::new();
    for layer in &image.layers {
        if let Some(ref hash) = layer.hash {
            paths.push(store.path_of(hash)?);
        }
    }

    let parent_chain = chain_over(&image.layers);
    Ok(ResolvedBase {
        layers: image.layers,
        paths,
        parent_chain,
    })
}
