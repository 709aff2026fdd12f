use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitmapError {
    #[error("raster shape mismatch: expected {expected} bytes, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid grid dimensions {width}x{height} (sides must be non-zero multiples of 4)")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("channel offset {0} out of range (0..=3)")]
    InvalidChannel(u8),

    #[error("sparse word index {index} out of range for grid of {len} words")]
    SparseIndexOutOfRange { index: u32, len: usize },

    #[error("sparse payload has {indices} indices but {values} values")]
    SparseLengthMismatch { indices: usize, values: usize },
}
