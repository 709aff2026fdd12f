pub mod bounds;
pub mod reproject;
pub mod tile;

// Foundation crate: pure coordinate math for the tile pyramid, no state.
pub use bounds::*;
pub use reproject::*;
pub use tile::*;
