//! Image model: layers, metadata documents, base resolution

pub mod layer;
pub mod metadata;
pub mod resolver;

pub use layer::{Layer, LayerKind, SCRATCH};
pub use metadata::{Image, ImageStore, CLUSTERFILE_ANNOTATION};
pub use resolver::{resolve_base, ResolvedBase};
