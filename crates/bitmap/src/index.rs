use foundation::{CANONICAL_ZOOM, PixelExtent, TileCoord, TileSize, tile_footprint};

use crate::error::BitmapError;
use crate::grid::CellGrid;
use crate::raster::{Raster, RasterOptions};
use crate::sparse::{SparseWords, SparseXy};

/// Lifecycle of one index tile.
///
/// Husk → Fetching → (RasterPending →) Ready. A failed fetch ends in `Failed`,
/// which answers queries like a husk but is never fetched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Husk,
    Fetching,
    /// Decoded pixels held back; packed on first query.
    RasterPending(Raster),
    Ready(CellGrid),
    Failed,
}

impl IndexState {
    pub fn name(&self) -> &'static str {
        match self {
            IndexState::Husk => "husk",
            IndexState::Fetching => "fetching",
            IndexState::RasterPending(_) => "raster-pending",
            IndexState::Ready(_) => "ready",
            IndexState::Failed => "failed",
        }
    }
}

/// Occupancy bitmap for one source tile at `(x, y, z)`.
#[derive(Debug, Clone)]
pub struct BitmapIndex {
    layer_id: String,
    coord: TileCoord,
    size: TileSize,
    /// Full tile footprint at [`CANONICAL_ZOOM`]; fixed at construction.
    extent: PixelExtent,
    state: IndexState,
}

impl BitmapIndex {
    /// Reserve a slot for a tile whose data is not fetched yet.
    pub fn husk(layer_id: impl Into<String>, coord: TileCoord, size: TileSize) -> Self {
        Self {
            layer_id: layer_id.into(),
            coord,
            size,
            extent: tile_footprint(coord, CANONICAL_ZOOM, size),
            state: IndexState::Husk,
        }
    }

    pub fn from_grid(
        layer_id: impl Into<String>,
        coord: TileCoord,
        grid: CellGrid,
    ) -> Self {
        let size = TileSize::new(grid.width(), grid.height());
        let mut index = Self::husk(layer_id, coord, size);
        index.state = IndexState::Ready(grid);
        index
    }

    pub fn layer_id(&self) -> &str {
        &self.layer_id
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn size(&self) -> TileSize {
        self.size
    }

    pub fn extent(&self) -> &PixelExtent {
        &self.extent
    }

    pub fn state(&self) -> &IndexState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, IndexState::Ready(_))
    }

    pub fn grid(&self) -> Option<&CellGrid> {
        match &self.state {
            IndexState::Ready(grid) => Some(grid),
            _ => None,
        }
    }

    /// Husk → Fetching. Returns `false` from any other state.
    pub fn begin_fetch(&mut self) -> bool {
        if !matches!(self.state, IndexState::Husk) {
            return false;
        }
        self.state = IndexState::Fetching;
        true
    }

    pub fn fail(&mut self) {
        if !self.is_ready() {
            self.state = IndexState::Failed;
        }
    }

    fn check_shape(&self, width: u32, height: u32) -> Result<(), BitmapError> {
        if (width, height) != (self.size.width, self.size.height) {
            return Err(BitmapError::ShapeMismatch {
                expected: self.size.pixel_count() * 4,
                actual: width as usize * height as usize * 4,
            });
        }
        Ok(())
    }

    pub fn fill_grid(&mut self, grid: CellGrid) -> Result<(), BitmapError> {
        self.check_shape(grid.width(), grid.height())?;
        self.state = IndexState::Ready(grid);
        Ok(())
    }

    /// Hold decoded pixels without packing them yet.
    pub fn fill_raster(&mut self, raster: Raster) -> Result<(), BitmapError> {
        self.check_shape(raster.width(), raster.height())?;
        self.state = IndexState::RasterPending(raster);
        Ok(())
    }

    /// Pack a pending raster if there is one, then return the grid.
    ///
    /// A raster that fails to pack moves the index to `Failed`.
    pub fn resolve(&mut self, opts: &RasterOptions) -> Result<Option<&CellGrid>, BitmapError> {
        if let IndexState::RasterPending(raster) = &self.state {
            match CellGrid::from_raster(raster, opts) {
                Ok(grid) => self.state = IndexState::Ready(grid),
                Err(e) => {
                    self.state = IndexState::Failed;
                    return Err(e);
                }
            }
        }
        Ok(self.grid())
    }

    /// Pixel origin of this tile at its own zoom.
    fn origin(&self) -> (u64, u64) {
        (
            u64::from(self.coord.x) * u64::from(self.size.width),
            u64::from(self.coord.y) * u64::from(self.size.height),
        )
    }

    /// Whether the query tile lies entirely inside this tile's footprint.
    ///
    /// `precomputed` is the query's footprint at [`CANONICAL_ZOOM`] when the
    /// caller already has it.
    pub fn can_index_region(&self, tile: TileCoord, precomputed: Option<&PixelExtent>) -> bool {
        match precomputed {
            Some(e) if e.zoom == CANONICAL_ZOOM => self.extent.contains(e),
            _ => self
                .extent
                .contains(&tile_footprint(tile, CANONICAL_ZOOM, self.size)),
        }
    }

    /// Whether any set pixel falls under the query tile's footprint.
    ///
    /// `None` while the index is not ready. Call [`Self::can_index_region`]
    /// first; a query outside the tile reports `Some(false)`.
    pub fn region_intersects_data(&self, tile: TileCoord) -> Option<bool> {
        let grid = self.grid()?;
        let fp = tile_footprint(tile, self.coord.z, self.size);
        let (ox, oy) = self.origin();
        let (w, h) = (u64::from(self.size.width), u64::from(self.size.height));

        if fp.max_x < ox || fp.max_y < oy || fp.min_x >= ox + w || fp.min_y >= oy + h {
            return Some(false);
        }
        let x0 = fp.min_x.saturating_sub(ox) as u32;
        let y0 = fp.min_y.saturating_sub(oy) as u32;
        let x1 = (fp.max_x - ox).min(w - 1) as u32;
        let y1 = (fp.max_y - oy).min(h - 1) as u32;
        Some(grid.any_set_in(x0, y0, x1, y1))
    }

    pub fn query_bit(&self, x: u32, y: u32) -> Option<bool> {
        self.grid().map(|g| g.query_bit(x, y))
    }

    /// Tile-local bounds of set pixels at this tile's zoom.
    ///
    /// An empty grid reports `(0, 0, width, height)`.
    pub fn occupied_pixel_extent(&self) -> Option<PixelExtent> {
        let grid = self.grid()?;
        let z = self.coord.z;
        Some(match grid.occupied_bounds() {
            Some([x0, y0, x1, y1]) => PixelExtent::new(
                u64::from(x0),
                u64::from(y0),
                u64::from(x1),
                u64::from(y1),
                z,
            ),
            None => PixelExtent::new(
                0,
                0,
                u64::from(grid.width()),
                u64::from(grid.height()),
                z,
            ),
        })
    }

    /// Occupied bounds in world pixels, reprojected to `dest_zoom`.
    pub fn occupied_world_extent(&self, dest_zoom: u8) -> Option<PixelExtent> {
        let (ox, oy) = self.origin();
        self.occupied_pixel_extent()
            .map(|e| e.offset(ox, oy).reprojected(dest_zoom))
    }

    pub fn sparse_xy(&self) -> Option<SparseXy> {
        self.grid().map(CellGrid::to_sparse_xy)
    }

    pub fn sparse_words(&self) -> Option<SparseWords> {
        self.grid().map(CellGrid::to_sparse_words)
    }
}

#[cfg(test)]
mod tests {
    use super::{BitmapIndex, IndexState};
    use crate::error::BitmapError;
    use crate::grid::CellGrid;
    use crate::raster::{Raster, RasterOptions};
    use foundation::{CANONICAL_ZOOM, PixelExtent, TileCoord, TileSize, tile_footprint};
    use pretty_assertions::assert_eq;

    fn ready_index(coord: TileCoord, side: u32, pixels: &[(u32, u32)]) -> BitmapIndex {
        let mut grid = CellGrid::empty(side, side).unwrap();
        for &(x, y) in pixels {
            grid.set_bit(x, y);
        }
        BitmapIndex::from_grid("layer", coord, grid)
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut idx = BitmapIndex::husk("l", TileCoord::new(0, 0, 0), TileSize::square(16));
        assert_eq!(idx.state().name(), "husk");
        assert!(idx.begin_fetch());
        assert!(!idx.begin_fetch());
        assert_eq!(idx.state().name(), "fetching");
        assert_eq!(idx.region_intersects_data(TileCoord::new(0, 0, 0)), None);

        idx.fill_grid(CellGrid::empty(16, 16).unwrap()).unwrap();
        assert!(idx.is_ready());
        idx.fail();
        assert!(idx.is_ready());
    }

    #[test]
    fn failed_fetch_stays_failed() {
        let mut idx = BitmapIndex::husk("l", TileCoord::new(0, 0, 0), TileSize::square(16));
        idx.begin_fetch();
        idx.fail();
        assert_eq!(idx.state(), &IndexState::Failed);
        assert!(!idx.begin_fetch());
        assert_eq!(idx.occupied_pixel_extent(), None);
    }

    #[test]
    fn fill_rejects_wrong_tile_size() {
        let mut idx = BitmapIndex::husk("l", TileCoord::new(0, 0, 0), TileSize::square(16));
        let err = idx.fill_grid(CellGrid::empty(8, 8).unwrap()).unwrap_err();
        assert!(matches!(err, BitmapError::ShapeMismatch { .. }));
    }

    #[test]
    fn pending_raster_packs_on_resolve() {
        let mut idx = BitmapIndex::husk("l", TileCoord::new(0, 0, 0), TileSize::square(4));
        let mut rgba = vec![0u8; 64];
        rgba[4 * 6 + 3] = 255;
        idx.fill_raster(Raster::new(4, 4, rgba).unwrap()).unwrap();
        assert_eq!(idx.state().name(), "raster-pending");
        assert_eq!(idx.query_bit(2, 1), None);

        let grid = idx.resolve(&RasterOptions::default()).unwrap().unwrap();
        assert!(grid.query_bit(2, 1));
        assert_eq!(idx.query_bit(2, 1), Some(true));
    }

    #[test]
    fn can_index_only_contained_tiles() {
        let idx = ready_index(TileCoord::new(1, 1, 1), 256, &[]);
        assert!(idx.can_index_region(TileCoord::new(1, 1, 1), None));
        assert!(idx.can_index_region(TileCoord::new(3, 2, 2), None));
        assert!(!idx.can_index_region(TileCoord::new(0, 0, 0), None));
        assert!(!idx.can_index_region(TileCoord::new(0, 3, 2), None));

        let pre = tile_footprint(TileCoord::new(3, 3, 2), CANONICAL_ZOOM, TileSize::square(256));
        assert!(idx.can_index_region(TileCoord::new(3, 3, 2), Some(&pre)));
    }

    #[test]
    fn region_query_finer_than_index() {
        // z=0 index, one pixel set at (10, 10): covers z=8 tile (10, 10).
        let idx = ready_index(TileCoord::new(0, 0, 0), 256, &[(10, 10)]);
        assert_eq!(idx.region_intersects_data(TileCoord::new(10, 10, 8)), Some(true));
        assert_eq!(idx.region_intersects_data(TileCoord::new(11, 10, 8)), Some(false));
        // z=10 tiles below pixel (10, 10) span x in 40..44.
        assert_eq!(idx.region_intersects_data(TileCoord::new(43, 41, 10)), Some(true));
        assert_eq!(idx.region_intersects_data(TileCoord::new(44, 41, 10)), Some(false));
    }

    #[test]
    fn region_query_coarser_than_index() {
        // z=2 index at (1, 0); pixel (200, 3) set.
        let idx = ready_index(TileCoord::new(1, 0, 2), 256, &[(200, 3)]);
        // Query the z=2 tile itself and the z=1 parent (extends beyond the index).
        assert_eq!(idx.region_intersects_data(TileCoord::new(1, 0, 2)), Some(true));
        assert_eq!(idx.region_intersects_data(TileCoord::new(0, 0, 1)), Some(true));
        // Disjoint tile at the same zoom.
        assert_eq!(idx.region_intersects_data(TileCoord::new(2, 0, 2)), Some(false));
    }

    #[test]
    fn occupied_extents() {
        let empty = ready_index(TileCoord::new(0, 0, 0), 64, &[]);
        assert_eq!(
            empty.occupied_pixel_extent(),
            Some(PixelExtent::new(0, 0, 64, 64, 0))
        );

        let idx = ready_index(TileCoord::new(2, 1, 3), 64, &[(3, 4), (10, 60)]);
        assert_eq!(
            idx.occupied_pixel_extent(),
            Some(PixelExtent::new(3, 4, 10, 60, 3))
        );
        assert_eq!(
            idx.occupied_world_extent(3),
            Some(PixelExtent::new(131, 68, 138, 124, 3))
        );
        assert_eq!(
            idx.occupied_world_extent(4),
            Some(PixelExtent::new(262, 136, 277, 249, 4))
        );
    }
}
