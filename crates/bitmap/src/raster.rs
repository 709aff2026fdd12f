use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BitmapError;

/// A decoded RGBA8888 raster, as handed over by a decoder.
///
/// The pixel buffer is immutable and cheaply clonable so it can cross into a
/// worker and back without sharing mutable memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    rgba: Bytes,
}

impl Raster {
    pub fn new(width: u32, height: u32, rgba: impl Into<Bytes>) -> Result<Self, BitmapError> {
        let rgba = rgba.into();
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(BitmapError::ShapeMismatch {
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn into_bytes(self) -> Bytes {
        self.rgba
    }
}

/// How raster pixels are classified as data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterOptions {
    /// Byte within each 4-byte pixel that carries occupancy; 3 is alpha.
    pub channel_offset: u8,
    /// A pixel is data iff its channel byte is `>= alpha_threshold`.
    pub alpha_threshold: u8,
    /// Reclassify opaque pixels whose other three channels are all dark.
    pub shadow_recovery: bool,
    pub unshadow_threshold: u8,
    /// Undo one-pixel +x/+y smoothing bleed. Also erodes genuine edges.
    pub stroke_recovery: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            channel_offset: 3,
            alpha_threshold: 1,
            shadow_recovery: false,
            unshadow_threshold: 8,
            stroke_recovery: false,
        }
    }
}

impl RasterOptions {
    pub fn validate(&self) -> Result<(), BitmapError> {
        if self.channel_offset > 3 {
            return Err(BitmapError::InvalidChannel(self.channel_offset));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Raster, RasterOptions};
    use crate::error::BitmapError;

    #[test]
    fn rejects_wrong_length() {
        let err = Raster::new(4, 4, vec![0u8; 63]).unwrap_err();
        assert_eq!(
            err,
            BitmapError::ShapeMismatch {
                expected: 64,
                actual: 63
            }
        );
        assert!(Raster::new(4, 4, vec![0u8; 64]).is_ok());
    }

    #[test]
    fn options_default_to_alpha() {
        let o = RasterOptions::default();
        assert_eq!(o.channel_offset, 3);
        assert!(o.validate().is_ok());

        let bad = RasterOptions {
            channel_offset: 4,
            ..o
        };
        assert_eq!(bad.validate(), Err(BitmapError::InvalidChannel(4)));
    }
}
