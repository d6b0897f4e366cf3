//! The build engine: hashing, mounting, instruction execution and the
//! local/cloud pipelines

pub mod builder;
pub mod cloud;
pub mod engine;
pub mod hasher;
pub mod mount;

pub use builder::{BuildRequest, LocalBuilder};
pub use cloud::CloudBuilder;
pub use engine::{Engine, ExecState, MAX_LAYER_DEPTH};
pub use mount::{MountDriver, MountTarget, OverlayDriver};
