use std::path::Path;

use bitmap::RasterOptions;
use foundation::{CANONICAL_ZOOM, TileSize};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When supplemental index tiles are fetched.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LazyMode {
    /// Fetch the master and every supplemental tile up front.
    #[default]
    None,
    /// Supplementals stay husks until a query touches them; their pixels are
    /// packed on the first query after arrival.
    OnFirstTouch,
    /// Fetch the master up front and the rest in the background.
    MasterThenBackground,
}

/// Per-layer configuration. Plain data, copied into each index set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Decode and pack on the blocking pool instead of the driving task.
    pub multithreading: bool,
    pub cache: bool,
    pub max_supplemental_tiles: usize,
    /// Deepest zoom a supplemental index tile may be fetched from.
    pub max_index_zoom: u8,
    pub lazy: LazyMode,
    pub tile_width: u32,
    pub tile_height: u32,
    pub max_in_flight: usize,
    pub raster: RasterOptions,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            multithreading: true,
            cache: true,
            max_supplemental_tiles: 4,
            max_index_zoom: 18,
            lazy: LazyMode::None,
            tile_width: 256,
            tile_height: 256,
            max_in_flight: 4,
            raster: RasterOptions::default(),
        }
    }
}

impl IndexOptions {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let opts: Self = serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn tile_size(&self) -> TileSize {
        TileSize::new(self.tile_width, self.tile_height)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tile_size().is_supported() {
            return Err(ConfigError::UnsupportedTileSize {
                width: self.tile_width,
                height: self.tile_height,
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        self.raster.validate()?;
        Ok(())
    }

    /// Check a layer's zoom range against these options.
    pub fn validate_zooms(&self, min_z: u8, max_z: u8) -> Result<(), ConfigError> {
        if min_z > max_z || max_z > CANONICAL_ZOOM {
            return Err(ConfigError::ZoomRange {
                min_z,
                max_z,
                limit: CANONICAL_ZOOM,
            });
        }
        Ok(())
    }
}
