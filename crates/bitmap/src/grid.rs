use crate::error::BitmapError;
use crate::raster::{Raster, RasterOptions};
use crate::recovery::{extract_channel, shadow_recovery, stroke_recovery};

/// Packed occupancy bitmap for one tile.
///
/// Each `u16` word packs one 4x4 pixel block; pixel `(x, y)` lives in word
/// `(y >> 2) * (width >> 2) + (x >> 2)` at bit `((y & 3) << 2) + (x & 3)`.
/// A set bit means "classified as data"; a clear bit means NODATA or unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellGrid {
    width: u32,
    height: u32,
    words: Vec<u16>,
}

#[inline]
fn bit_of(x: u32, y: u32) -> u16 {
    1u16 << (((y & 3) << 2) + (x & 3))
}

/// Mask selecting columns `c0..=c1` of rows `r0..=r1` inside one block word.
#[inline]
fn block_mask(c0: u32, c1: u32, r0: u32, r1: u32) -> u16 {
    let row = ((1u16 << (c1 - c0 + 1)) - 1) << c0;
    (r0..=r1).fold(0u16, |m, r| m | (row << (r * 4)))
}

impl CellGrid {
    pub fn empty(width: u32, height: u32) -> Result<Self, BitmapError> {
        if width == 0 || height == 0 || width % 4 != 0 || height % 4 != 0 {
            return Err(BitmapError::InvalidDimensions { width, height });
        }
        let len = (width as usize / 4) * (height as usize / 4);
        Ok(Self {
            width,
            height,
            words: vec![0; len],
        })
    }

    pub(crate) fn from_words(width: u32, height: u32, words: Vec<u16>) -> Self {
        debug_assert_eq!(words.len(), (width as usize / 4) * (height as usize / 4));
        Self {
            width,
            height,
            words,
        }
    }

    /// Build a grid from RGBA bytes.
    ///
    /// `rgba.len()` must be `width * height * 4`. The occupancy channel is
    /// copied into a working plane, the optional recovery passes run on that
    /// copy (shadow first, then stroke), and the plane is thresholded into bits.
    pub fn from_rgba(
        rgba: &[u8],
        width: u32,
        height: u32,
        opts: &RasterOptions,
    ) -> Result<Self, BitmapError> {
        opts.validate()?;
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(BitmapError::ShapeMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        let mut grid = Self::empty(width, height)?;

        let channel = opts.channel_offset as usize;
        let mut plane = extract_channel(rgba, channel);
        if opts.shadow_recovery {
            shadow_recovery(
                &mut plane,
                rgba,
                channel,
                opts.alpha_threshold,
                opts.unshadow_threshold,
            );
        }
        if opts.stroke_recovery {
            stroke_recovery(
                &mut plane,
                width as usize,
                height as usize,
                opts.alpha_threshold,
            );
        }

        grid.pack_plane(&plane, opts.alpha_threshold);
        Ok(grid)
    }

    pub fn from_raster(raster: &Raster, opts: &RasterOptions) -> Result<Self, BitmapError> {
        Self::from_rgba(raster.rgba(), raster.width(), raster.height(), opts)
    }

    fn pack_plane(&mut self, plane: &[u8], threshold: u8) {
        let w = self.width as usize;
        let cols = self.cols();
        for (by, band) in plane.chunks_exact(w * 4).enumerate() {
            for (bx, word) in self.words[by * cols..(by + 1) * cols].iter_mut().enumerate() {
                let mut packed = 0u16;
                for ly in 0..4 {
                    let row = &band[ly * w + bx * 4..ly * w + bx * 4 + 4];
                    for (lx, &v) in row.iter().enumerate() {
                        if v >= threshold {
                            packed |= 1u16 << (ly * 4 + lx);
                        }
                    }
                }
                *word = packed;
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Words per grid row.
    pub fn cols(&self) -> usize {
        self.width as usize / 4
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Whether pixel `(x, y)` is set. Pixels outside the tile read as clear.
    pub fn query_bit(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = (y >> 2) as usize * self.cols() + (x >> 2) as usize;
        self.words[idx] & bit_of(x, y) != 0
    }

    pub fn set_bit(&mut self, x: u32, y: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y >> 2) as usize * self.cols() + (x >> 2) as usize;
        self.words[idx] |= bit_of(x, y);
    }

    /// Whether any pixel in the inclusive rectangle `(x0, y0)..=(x1, y1)` is
    /// set. The rectangle is clipped to the tile. Returns on the first hit.
    pub fn any_set_in(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> bool {
        if x0 > x1 || y0 > y1 || x0 >= self.width || y0 >= self.height {
            return false;
        }
        let x1 = x1.min(self.width - 1);
        let y1 = y1.min(self.height - 1);
        let cols = self.cols();

        for by in (y0 >> 2)..=(y1 >> 2) {
            let r0 = if by == y0 >> 2 { y0 & 3 } else { 0 };
            let r1 = if by == y1 >> 2 { y1 & 3 } else { 3 };
            let row_base = by as usize * cols;
            for bx in (x0 >> 2)..=(x1 >> 2) {
                let word = self.words[row_base + bx as usize];
                if word == 0 {
                    continue;
                }
                let c0 = if bx == x0 >> 2 { x0 & 3 } else { 0 };
                let c1 = if bx == x1 >> 2 { x1 & 3 } else { 3 };
                if word & block_mask(c0, c1, r0, r1) != 0 {
                    return true;
                }
            }
        }
        false
    }

    /// Bounds `[min_x, min_y, max_x, max_y]` of all set pixels, or `None` when
    /// nothing is set.
    pub fn occupied_bounds(&self) -> Option<[u32; 4]> {
        let cols = self.cols();
        let mut acc: Option<[u32; 4]> = None;

        for (i, &w) in self.words.iter().enumerate() {
            if w == 0 {
                continue;
            }
            let bx = (i % cols) as u32 * 4;
            let by = (i / cols) as u32 * 4;

            let col_mask = (w | (w >> 4) | (w >> 8) | (w >> 12)) & 0xF;
            let row_mask = (0..4u16)
                .filter(|r| (w >> (r * 4)) & 0xF != 0)
                .fold(0u16, |m, r| m | (1u16 << r));

            let min_x = bx + col_mask.trailing_zeros();
            let max_x = bx + (15 - col_mask.leading_zeros());
            let min_y = by + row_mask.trailing_zeros();
            let max_y = by + (15 - row_mask.leading_zeros());

            acc = Some(match acc {
                None => [min_x, min_y, max_x, max_y],
                Some([a, b, c, d]) => [a.min(min_x), b.min(min_y), c.max(max_x), d.max(max_y)],
            });
        }
        acc
    }

    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}
