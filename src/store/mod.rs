//! Content-addressed layer storage and the build cache

pub mod cache;
pub mod layer_store;

pub use cache::{chain_over, extend_chain, CacheProbe, ProbeHit};
pub use layer_store::LayerStore;
