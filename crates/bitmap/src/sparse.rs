//! Sparse exports of a [`CellGrid`].

use crate::error::BitmapError;
use crate::grid::CellGrid;

/// Non-zero grid words as parallel `(index, value)` arrays; the cache payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseWords {
    pub indices: Vec<u32>,
    pub values: Vec<u16>,
}

impl SparseWords {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Coordinates of every set pixel as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseXy {
    pub xs: Vec<u32>,
    pub ys: Vec<u32>,
}

impl SparseXy {
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.xs.iter().copied().zip(self.ys.iter().copied())
    }
}

impl CellGrid {
    pub fn to_sparse_words(&self) -> SparseWords {
        let mut out = SparseWords::default();
        for (i, &w) in self.words().iter().enumerate() {
            if w != 0 {
                out.indices.push(i as u32);
                out.values.push(w);
            }
        }
        out
    }

    /// Rebuild a grid from its sparse words. Later duplicates of an index win.
    pub fn from_sparse_words(
        width: u32,
        height: u32,
        sparse: &SparseWords,
    ) -> Result<Self, BitmapError> {
        if sparse.indices.len() != sparse.values.len() {
            return Err(BitmapError::SparseLengthMismatch {
                indices: sparse.indices.len(),
                values: sparse.values.len(),
            });
        }
        let mut words = Self::empty(width, height)?.words().to_vec();
        let len = words.len();
        for (&index, &value) in sparse.indices.iter().zip(&sparse.values) {
            let slot = words
                .get_mut(index as usize)
                .ok_or(BitmapError::SparseIndexOutOfRange { index, len })?;
            *slot = value;
        }
        Ok(Self::from_words(width, height, words))
    }

    /// Every set pixel, block by block.
    pub fn to_sparse_xy(&self) -> SparseXy {
        let cols = self.cols();
        let mut out = SparseXy::default();
        for (i, &w) in self.words().iter().enumerate() {
            if w == 0 {
                continue;
            }
            let bx = (i % cols) as u32 * 4;
            let by = (i / cols) as u32 * 4;
            for bit in 0..16u32 {
                if w & (1u16 << bit) != 0 {
                    out.xs.push(bx + (bit & 3));
                    out.ys.push(by + (bit >> 2));
                }
            }
        }
        out
    }
}
