//! Command implementations

mod build;
mod completions;
mod images;
mod inspect;

pub use build::build;
pub use completions::completions;
pub use images::images;
pub use inspect::inspect;
