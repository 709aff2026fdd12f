//! Per-layer tile-existence prediction from bitmap index tiles.

pub mod dataset_extent;
pub mod error;
pub mod loader;
pub mod options;
pub mod select;
pub mod set;

pub use dataset_extent::*;
pub use error::*;
pub use loader::*;
pub use options::*;
pub use select::*;
pub use set::*;
