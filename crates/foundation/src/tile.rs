use serde::{Deserialize, Serialize};

/// Quad-tree tile address.
///
/// Field order puts `z` first so the derived ordering sorts coarse tiles ahead
/// of fine ones, then row-major within a zoom level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this zoom level.
    pub fn world_tiles(z: u8) -> u64 {
        1u64 << z
    }

    /// Whether `x` and `y` lie inside `[0, 2^z)`.
    pub fn is_valid(&self) -> bool {
        let n = Self::world_tiles(self.z);
        u64::from(self.x) < n && u64::from(self.y) < n
    }

    /// Substitute `{x}`, `{y}` and `{z}` in a URL template.
    pub fn fill_template(&self, template: &str) -> String {
        template
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
            .replace("{z}", &self.z.to_string())
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl std::str::FromStr for TileCoord {
    type Err = String;

    /// Parses `z/x/y`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        let (Some(z), Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected z/x/y, got {s:?}"));
        };
        let z = z.parse::<u8>().map_err(|e| format!("bad zoom {z:?}: {e}"))?;
        let x = x.parse::<u32>().map_err(|e| format!("bad x {x:?}: {e}"))?;
        let y = y.parse::<u32>().map_err(|e| format!("bad y {y:?}: {e}"))?;
        Ok(Self::new(x, y, z))
    }
}

/// Pixel dimensions of one raster tile.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    pub const MIN_SIDE: u32 = 4;
    pub const MAX_SIDE: u32 = 4096;

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Power-of-two sides within `[MIN_SIDE, MAX_SIDE]`.
    pub fn is_supported(&self) -> bool {
        let ok = |v: u32| v.is_power_of_two() && (Self::MIN_SIDE..=Self::MAX_SIDE).contains(&v);
        ok(self.width) && ok(self.height)
    }

    /// `log2(width)`; the number of zoom levels one tile spans horizontally.
    pub fn width_bits(&self) -> u8 {
        self.width.max(1).ilog2() as u8
    }

    pub fn height_bits(&self) -> u8 {
        self.height.max(1).ilog2() as u8
    }
}

impl Default for TileSize {
    fn default() -> Self {
        Self::square(256)
    }
}

#[cfg(test)]
mod tests {
    use super::{TileCoord, TileSize};

    #[test]
    fn coord_orders_coarse_first() {
        let mut v = vec![
            TileCoord::new(0, 0, 3),
            TileCoord::new(5, 1, 1),
            TileCoord::new(0, 0, 0),
        ];
        v.sort();
        assert_eq!(v[0].z, 0);
        assert_eq!(v[1].z, 1);
        assert_eq!(v[2].z, 3);
    }

    #[test]
    fn validity_follows_zoom() {
        assert!(TileCoord::new(0, 0, 0).is_valid());
        assert!(!TileCoord::new(1, 0, 0).is_valid());
        assert!(TileCoord::new(3, 3, 2).is_valid());
        assert!(!TileCoord::new(3, 4, 2).is_valid());
    }

    #[test]
    fn fills_url_template() {
        let t = TileCoord::new(12, 34, 5);
        assert_eq!(
            t.fill_template("https://tiles/{z}/{x}/{y}.png"),
            "https://tiles/5/12/34.png"
        );
    }

    #[test]
    fn parses_z_x_y() {
        let t: TileCoord = "7/10/20".parse().unwrap();
        assert_eq!(t, TileCoord::new(10, 20, 7));
        assert!("7/10".parse::<TileCoord>().is_err());
        assert!("7/10/20/1".parse::<TileCoord>().is_err());
    }

    #[test]
    fn tile_size_support() {
        assert!(TileSize::square(256).is_supported());
        assert!(TileSize::new(512, 256).is_supported());
        assert!(!TileSize::square(300).is_supported());
        assert!(!TileSize::square(2).is_supported());
        assert!(!TileSize::square(8192).is_supported());
        assert_eq!(TileSize::square(512).width_bits(), 9);
    }
}
