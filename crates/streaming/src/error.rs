use bitmap::BitmapError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {reason}")]
    Request { url: String, reason: String },
}

/// The decoder could not turn a response body into pixels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("raster decode failed: {0}")]
pub struct DecodeError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("index store unavailable")]
    Unavailable,

    #[error("index store I/O error: {0}")]
    Io(String),

    #[error("index record could not be encoded: {0}")]
    Encode(#[from] RecordError),
}

/// Why a stored index record could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("unexpected end of record")]
    UnexpectedEof,

    #[error("invalid record magic")]
    InvalidMagic,

    #[error("unsupported record version: {found}")]
    UnsupportedVersion { found: u16 },

    #[error("record is {found_width}x{found_height}, expected {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        found_width: u32,
        found_height: u32,
    },

    #[error("record payload rejected: {0}")]
    Payload(#[from] BitmapError),

    #[error("record declares {count} words, grid holds at most {max}")]
    CountOutOfRange { count: usize, max: usize },

    #[error("{0} trailing bytes after record payload")]
    TrailingBytes(usize),

    #[error("record I/O error: {0}")]
    Io(String),
}

/// Failure to obtain one member's pixels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    DecodeFailure(#[from] DecodeError),

    #[error(transparent)]
    ShapeMismatch(#[from] BitmapError),

    #[error("worker task failed: {0}")]
    Worker(String),
}
