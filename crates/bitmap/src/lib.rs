//! Packed one-bit-per-pixel occupancy bitmaps for single index tiles.

pub mod error;
pub mod grid;
pub mod index;
pub mod raster;
pub mod recovery;
pub mod sparse;

pub use error::*;
pub use grid::*;
pub use index::*;
pub use raster::*;
pub use sparse::*;
