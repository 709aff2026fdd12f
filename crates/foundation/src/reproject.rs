//! Zoom-level reprojection of tile and pixel coordinates.
//!
//! Coordinates are unsigned and 64-bit. A pixel coordinate at zoom `z` with a
//! 4096px tile reaches `2^(z + 12)`, so at [`CANONICAL_ZOOM`] every supported
//! tile size stays below `2^36`.

use crate::bounds::PixelExtent;
use crate::tile::{TileCoord, TileSize};

/// Zoom level every dataset and index extent is compared at.
///
/// Must be at least as fine as any supported `max_z`.
pub const CANONICAL_ZOOM: u8 = 24;

/// Shift `value` from `from_zoom` to `to_zoom`.
///
/// Refining shifts left, coarsening shifts right (logical). A shift of 64 or
/// more saturates: towards `u64::MAX` when refining, towards 0 when coarsening.
#[inline]
pub fn reproject_coordinate(value: u64, from_zoom: u8, to_zoom: u8) -> u64 {
    if to_zoom > from_zoom {
        let d = u32::from(to_zoom - from_zoom);
        value.checked_shl(d).unwrap_or(u64::MAX)
    } else {
        let d = u32::from(from_zoom - to_zoom);
        value.checked_shr(d).unwrap_or(0)
    }
}

/// Pixel rectangle covered by `tile`, expressed at `dest_zoom`.
///
/// The span is `reproject(tile_size, z, dest_zoom) - 1` (inclusive end pixel),
/// clamped to at least one pixel when the tile shrinks below a pixel.
pub fn tile_footprint(tile: TileCoord, dest_zoom: u8, size: TileSize) -> PixelExtent {
    let origin_x = u64::from(tile.x) * u64::from(size.width);
    let origin_y = u64::from(tile.y) * u64::from(size.height);

    let min_x = reproject_coordinate(origin_x, tile.z, dest_zoom);
    let min_y = reproject_coordinate(origin_y, tile.z, dest_zoom);
    let span_x = reproject_coordinate(u64::from(size.width), tile.z, dest_zoom).max(1);
    let span_y = reproject_coordinate(u64::from(size.height), tile.z, dest_zoom).max(1);

    PixelExtent::new(min_x, min_y, min_x + span_x - 1, min_y + span_y - 1, dest_zoom)
}

/// Deepest zoom delta at which one tile still indexes the whole area beneath
/// it at one pixel per destination tile: `2^k` tiles across fit in the tile's
/// pixel width. 256px gives 8, 512px gives 9.
pub fn max_single_index_zoom(size: TileSize) -> u8 {
    size.width_bits().min(size.height_bits())
}
