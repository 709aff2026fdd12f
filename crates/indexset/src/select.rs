//! Choosing which supplemental index tiles to fetch after the master.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use bitmap::BitmapIndex;
use foundation::{PixelExtent, TileCoord, TileSize, max_single_index_zoom};

/// Supplemental tiles to fetch, and whether together with the master they
/// index all of the dataset's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub tiles: Vec<TileCoord>,
    pub complete: bool,
}

impl Selection {
    fn none() -> Self {
        Self {
            tiles: Vec::new(),
            complete: true,
        }
    }
}

/// Inputs that stay fixed for one layer.
#[derive(Debug, Clone, Copy)]
pub struct SelectParams {
    pub min_z: u8,
    pub max_z: u8,
    pub max_index_zoom: u8,
    pub budget: usize,
}

/// Pick supplemental tiles for a ready master.
///
/// `dataset` is the canonical dataset extent when one is known.
pub fn select_supplemental(
    master: &BitmapIndex,
    dataset: Option<&PixelExtent>,
    params: SelectParams,
) -> Selection {
    let size = master.size();
    let k = max_single_index_zoom(size);
    let SelectParams {
        min_z,
        max_z,
        max_index_zoom,
        budget,
    } = params;

    if max_z.saturating_sub(min_z) <= k {
        return Selection::none();
    }
    let Some(grid) = master.grid() else {
        return Selection {
            tiles: Vec::new(),
            complete: false,
        };
    };
    if grid.is_empty() {
        return Selection::none();
    }
    let floor = min_z + 1;
    if budget == 0 || max_index_zoom < floor {
        return Selection {
            tiles: Vec::new(),
            complete: false,
        };
    }
    let top = (max_z - k).min(max_index_zoom);

    let single = dataset.and_then(|e| single_tile(e, top, floor, size));
    match single {
        Some((tile, true)) => {
            return Selection {
                tiles: vec![tile],
                complete: true,
            };
        }
        Some((tile, false)) if budget == 1 => {
            return Selection {
                tiles: vec![tile],
                complete: false,
            };
        }
        _ => {}
    }

    let xy = grid.to_sparse_xy();
    let (mz, origin_x, origin_y) = (
        master.coord().z,
        u64::from(master.coord().x) * u64::from(size.width),
        u64::from(master.coord().y) * u64::from(size.height),
    );
    let (wb, hb) = (size.width_bits(), size.height_bits());

    let mut dest = (max_z - k).clamp(floor, max_index_zoom);
    loop {
        let mut seen = BTreeSet::new();
        let mut over = false;
        'pixels: for (lx, ly) in xy.iter() {
            let xs = pixel_to_tiles(origin_x + u64::from(lx), mz + wb, dest);
            let ys = pixel_to_tiles(origin_y + u64::from(ly), mz + hb, dest);
            for ty in ys {
                for tx in xs.clone() {
                    seen.insert(TileCoord::new(tx as u32, ty as u32, dest));
                    if seen.len() > budget {
                        over = true;
                        break 'pixels;
                    }
                }
            }
        }
        if !over {
            return Selection {
                tiles: seen.into_iter().collect(),
                complete: true,
            };
        }
        if dest > floor {
            dest -= 1;
            continue;
        }
        return Selection {
            tiles: seen.into_iter().take(budget).collect(),
            complete: false,
        };
    }
}

/// Finest zoom in `floor..=top` where the extent falls in one tile.
///
/// Without an exact fit, returns the candidate with the smallest overshoot
/// past one tile, flagged `false`.
fn single_tile(
    dataset: &PixelExtent,
    top: u8,
    floor: u8,
    size: TileSize,
) -> Option<(TileCoord, bool)> {
    let (wb, hb) = (size.width_bits(), size.height_bits());
    let mut best: Option<(u128, TileCoord)> = None;
    for z in (floor..=top).rev() {
        let e = dataset.reprojected(z);
        let (x0, x1) = (e.min_x >> wb, e.max_x >> wb);
        let (y0, y1) = (e.min_y >> hb, e.max_y >> hb);
        let tile = TileCoord::new(x0 as u32, y0 as u32, z);
        if x0 == x1 && y0 == y1 {
            return Some((tile, true));
        }
        let miss_x = u128::from(e.width().saturating_sub(u64::from(size.width)));
        let miss_y = u128::from(e.height().saturating_sub(u64::from(size.height)));
        let miss = miss_x * miss_x + miss_y * miss_y;
        if best.is_none_or(|(d, _)| miss < d) {
            best = Some((miss, tile));
        }
    }
    best.map(|(_, tile)| (tile, false))
}

/// Tiles at `dest` covering one global pixel.
///
/// `pixel_zoom` is the zoom at which one pixel of the source grid is one
/// tile: the source tile's zoom plus its side's bit count.
fn pixel_to_tiles(pixel: u64, pixel_zoom: u8, dest: u8) -> RangeInclusive<u64> {
    if dest <= pixel_zoom {
        let t = pixel >> (pixel_zoom - dest);
        t..=t
    } else {
        let s = dest - pixel_zoom;
        (pixel << s)..=(((pixel + 1) << s) - 1)
    }
}
