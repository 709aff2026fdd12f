use bitmap::BitmapError;
use foundation::TileCoord;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported tile size {width}x{height}: sides must be powers of two in 4..=4096")]
    UnsupportedTileSize { width: u32, height: u32 },

    #[error("invalid zoom range {min_z}..={max_z} (max {limit})")]
    ZoomRange { min_z: u8, max_z: u8, limit: u8 },

    #[error("master tile {0} is outside its zoom level")]
    MasterOutOfRange(TileCoord),

    #[error("max_in_flight must be at least 1")]
    NoConcurrency,

    #[error(transparent)]
    Raster(#[from] BitmapError),

    #[error("failed to parse index options: {0}")]
    Parse(String),

    #[error("failed to read index options: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexSetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("tile {0} is not a member of this index set")]
    UnknownMember(TileCoord),

    #[error("payload for {coord} rejected: {source}")]
    Rejected {
        coord: TileCoord,
        #[source]
        source: BitmapError,
    },
}
