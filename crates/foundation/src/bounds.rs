use serde::{Deserialize, Serialize};

use crate::reproject::reproject_coordinate;

/// Axis-aligned, inclusive pixel rectangle expressed at one zoom level.
///
/// `zoom` names the tile pyramid level whose pixel grid the coordinates live
/// in: at zoom `z` the world is `tile_width << z` pixels across.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelExtent {
    pub min_x: u64,
    pub min_y: u64,
    pub max_x: u64,
    pub max_y: u64,
    pub zoom: u8,
}

impl PixelExtent {
    pub fn new(min_x: u64, min_y: u64, max_x: u64, max_y: u64, zoom: u8) -> Self {
        debug_assert!(min_x <= max_x && min_y <= max_y);
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
            zoom,
        }
    }

    pub fn width(&self) -> u64 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u64 {
        self.max_y - self.min_y + 1
    }

    /// Moves the extent to `dest_zoom`.
    ///
    /// Minimum edges are plain shifts. When refining, maximum edges land on the
    /// last pixel of the refined span so the extent keeps covering every pixel
    /// it covered before. Coarsening truncates both edges, which only grows
    /// the covered area.
    pub fn reprojected(&self, dest_zoom: u8) -> Self {
        if dest_zoom == self.zoom {
            return *self;
        }
        let min_x = reproject_coordinate(self.min_x, self.zoom, dest_zoom);
        let min_y = reproject_coordinate(self.min_y, self.zoom, dest_zoom);
        let (max_x, max_y) = if dest_zoom > self.zoom {
            (
                reproject_coordinate(self.max_x + 1, self.zoom, dest_zoom) - 1,
                reproject_coordinate(self.max_y + 1, self.zoom, dest_zoom) - 1,
            )
        } else {
            (
                reproject_coordinate(self.max_x, self.zoom, dest_zoom),
                reproject_coordinate(self.max_y, self.zoom, dest_zoom),
            )
        };
        Self::new(min_x, min_y, max_x, max_y, dest_zoom)
    }

    /// Translate by a non-negative offset, keeping the zoom.
    pub fn offset(&self, dx: u64, dy: u64) -> Self {
        Self::new(
            self.min_x + dx,
            self.min_y + dy,
            self.max_x + dx,
            self.max_y + dy,
            self.zoom,
        )
    }

    /// Whether `other` lies fully inside `self`. Both must share a zoom.
    pub fn contains(&self, other: &PixelExtent) -> bool {
        debug_assert_eq!(self.zoom, other.zoom);
        other.min_x >= self.min_x
            && other.min_y >= self.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    pub fn intersects(&self, other: &PixelExtent) -> bool {
        debug_assert_eq!(self.zoom, other.zoom);
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn as_array(&self) -> [u64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}
