//! Build cache chains
//!
//! A chain identity is a cumulative digest over the exact sequence of
//! instructions (and, for COPY, their source content) up to a point:
//! `chain(0) = ""`, `chain(i) = sha256(chain(i-1), cache_key(layer_i))`.
//! Two builds share a prefix of chain identities exactly when their
//! instruction prefixes had the same effect, which is what makes the
//! chain a sound cache lookup key.

use crate::config::Layout;
use crate::error::StrataResult;
use crate::image::{Image, ImageStore, Layer, LayerKind};
use crate::store::LayerStore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Extend a parent chain identity with one layer.
///
/// `cache_id` carries the COPY source digest; non-COPY layers pass None.
pub fn extend_chain(
    parent: &str,
    kind: LayerKind,
    value: &str,
    cache_id: Option<&str>,
) -> String {
    let key = format!("{kind}\n{value}\n{}", cache_id.unwrap_or_default());
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Chain identity over a whole layer sequence, using each layer's
/// recorded cache id. Used to seed a build's parent chain from its
/// resolved base layers.
pub fn chain_over(layers: &[Layer]) -> String {
    let mut parent = String::new();
    for layer in layers {
        parent = extend_chain(&parent, layer.kind, &layer.value, layer.cache_id.as_deref());
    }
    parent
}

/// Outcome of a successful cache probe
#[derive(Debug, Clone)]
pub struct ProbeHit {
    /// Content hash of the previously produced layer; None when the
    /// cached instruction produced no filesystem change
    pub layer_hash: Option<String>,

    /// Chain identity including the probed layer
    pub chain: String,
}

/// Answers "has an equivalent instruction already produced a layer?"
///
/// Chains are restored from every stored image metadata document; a hit
/// additionally requires the referenced layer content to still exist in
/// the layer store.
pub struct CacheProbe {
    chains: HashMap<String, Option<String>>,
    layers: LayerStore,
}

impl CacheProbe {
    /// A probe with no recorded chains, for --no-cache builds
    pub fn cold(layout: &Layout) -> Self {
        Self {
            chains: HashMap::new(),
            layers: LayerStore::new(layout.clone()),
        }
    }

    /// Restore cache chains from stored image metadata. Unreadable
    /// documents are skipped with a warning; restore itself never fails
    /// the build.
    pub async fn restore(layout: &Layout) -> Self {
        let mut probe = Self {
            chains: HashMap::new(),
            layers: LayerStore::new(layout.clone()),
        };

        let images = ImageStore::new(layout.clone());
        let entries = match images.list().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("failed to list stored images, starting with cold cache: {e}");
                return probe;
            }
        };

        for (name, id) in entries {
            match images.by_id(&id).await {
                Ok(image) => probe.absorb(&image),
                Err(e) => warn!("skipping cache restore for image {name}: {e}"),
            }
        }

        debug!("restored {} cache chains", probe.chains.len());
        probe
    }

    /// Record the chains of one image's layer sequence
    fn absorb(&mut self, image: &Image) {
        let mut parent = String::new();
        for layer in &image.layers {
            parent = extend_chain(&parent, layer.kind, &layer.value, layer.cache_id.as_deref());
            self.chains
                .entry(parent.clone())
                .or_insert_with(|| layer.hash.clone());
        }
    }

    /// Probe for a previously recorded equivalent of `layer` executed on
    /// top of `parent`. `source_digest` must be supplied for COPY layers.
    pub fn probe(
        &self,
        parent: &str,
        layer: &Layer,
        source_digest: Option<&str>,
    ) -> Option<ProbeHit> {
        let chain = extend_chain(parent, layer.kind, &layer.value, source_digest);
        let recorded = self.chains.get(&chain)?;

        if let Some(hash) = recorded {
            if !self.layers.contains(hash) {
                debug!("chain hit for `{} {}` but layer {hash} is gone", layer.kind, layer.value);
                return None;
            }
        }

        Some(ProbeHit {
            layer_hash: recorded.clone(),
            chain,
        })
    }

    #[cfg(test)]
    fn insert(&mut self, chain: String, hash: Option<String>) {
        self.chains.insert(chain, hash);
    }
}

/// Verify every hashed layer of an image is present in the layer store
pub fn verify_layers_present(store: &LayerStore, image: &Image) -> StrataResult<()> {
    for layer in &image.layers {
        if let Some(ref hash) = layer.hash {
            store.path_of(hash)?;
        }
    }
    Ok(())
}
