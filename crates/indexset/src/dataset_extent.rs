use bitmap::BitmapIndex;
use foundation::{CANONICAL_ZOOM, PixelExtent};

/// Occupied bounds of a whole dataset at [`CANONICAL_ZOOM`].
///
/// Each edge remembers the zoom of the member that last set it; only a member
/// at least that fine may move it again, and only inwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetExtent {
    extent: PixelExtent,
    /// Source zoom per edge, in `[min_x, min_y, max_x, max_y]` order.
    edge_zoom: [u8; 4],
}

impl DatasetExtent {
    /// Seed from the master's occupied pixels. `None` until the master is ready.
    pub fn seed(master: &BitmapIndex) -> Option<Self> {
        let extent = master.occupied_world_extent(CANONICAL_ZOOM)?;
        Some(Self {
            extent,
            edge_zoom: [master.coord().z; 4],
        })
    }

    pub fn extent(&self) -> &PixelExtent {
        &self.extent
    }

    pub fn edge_zooms(&self) -> [u8; 4] {
        self.edge_zoom
    }

    /// Tighten edges from a ready member. Returns whether any edge moved.
    ///
    /// A member may move an edge when its footprint reaches past that edge
    /// and spans the whole extent along the other axis: every pixel it reports
    /// empty on that side is then known to hold no data. Each edge also keeps
    /// the zoom of the member that last set it, and only an equal or finer
    /// member may move it again.
    pub fn tighten(&mut self, member: &BitmapIndex) -> bool {
        let Some(seen) = member.occupied_world_extent(CANONICAL_ZOOM) else {
            return false;
        };
        let fp = member.extent();
        let cur = self.extent.as_array();
        let spans_rows = fp.min_y <= self.extent.min_y && fp.max_y >= self.extent.max_y;
        let spans_cols = fp.min_x <= self.extent.min_x && fp.max_x >= self.extent.max_x;
        let covers = [
            spans_rows && fp.min_x <= self.extent.min_x,
            spans_cols && fp.min_y <= self.extent.min_y,
            spans_rows && fp.max_x >= self.extent.max_x,
            spans_cols && fp.max_y >= self.extent.max_y,
        ];

        let z = member.coord().z;
        let new = seen.as_array();
        let mut next = cur;
        let mut zooms = self.edge_zoom;
        for edge in 0..4 {
            if !covers[edge] || z < zooms[edge] {
                continue;
            }
            zooms[edge] = z;
            // min edges move up, max edges move down.
            next[edge] = if edge < 2 {
                cur[edge].max(new[edge])
            } else {
                cur[edge].min(new[edge])
            };
        }
        if next[0] > next[2] || next[1] > next[3] {
            return false;
        }
        self.edge_zoom = zooms;
        if next == cur {
            return false;
        }
        self.extent = PixelExtent::new(next[0], next[1], next[2], next[3], CANONICAL_ZOOM);
        true
    }
}
