use bitmap::Raster;
use streaming::{DecodeError, RasterDecoder};

/// Decodes any format the `image` crate was built with into RGBA8.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl RasterDecoder for ImageDecoder {
    fn decode(&self, encoded: &[u8]) -> Result<Raster, DecodeError> {
        let img = image::load_from_memory(encoded)
            .map_err(|e| DecodeError(e.to_string()))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Raster::new(width, height, img.into_raw()).map_err(|e| DecodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::ImageDecoder;
    use image::{ImageFormat, Rgba, RgbaImage};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use streaming::RasterDecoder;

    #[test]
    fn decodes_png_alpha() {
        let mut img = RgbaImage::new(8, 4);
        img.put_pixel(5, 2, Rgba([10, 20, 30, 200]));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();

        let raster = ImageDecoder.decode(&png).unwrap();
        assert_eq!((raster.width(), raster.height()), (8, 4));
        assert_eq!(raster.rgba()[(2 * 8 + 5) * 4 + 3], 200);
        assert_eq!(raster.rgba()[3], 0);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(ImageDecoder.decode(b"not an image").is_err());
    }
}
