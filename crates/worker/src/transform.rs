//! Pure image transformations used by the built-in workers.
//!
//! Handlers call these from `spawn_blocking`; implementations must not
//! touch the async runtime.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("unsupported format: {0}")]
    Unsupported(String),
}

/// Header-level facts about an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageFields {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// `transform(bytes, params) -> bytes | fields`.
pub trait ImageTransformer: Send + Sync {
    /// Scale down to `width` pixels wide, keeping the aspect ratio, and
    /// re-encode in the format implied by `filename`.
    fn thumbnail(&self, bytes: &[u8], filename: &str, width: u32) -> Result<Vec<u8>, TransformError>;

    /// Read dimensions and format without decoding pixel data.
    fn probe(&self, bytes: &[u8]) -> Result<ImageFields, TransformError>;
}

/// Transformer backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransformer;

impl ImageTransformer for DefaultTransformer {
    fn thumbnail(&self, bytes: &[u8], filename: &str, width: u32) -> Result<Vec<u8>, TransformError> {
        let format = ImageFormat::from_path(filename).map_err(|_| TransformError::Unsupported(filename.to_string()))?;
        let img = image::load_from_memory(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;

        let resized = if img.width() > width {
            img.thumbnail(width, u32::MAX)
        } else {
            img
        };
        // JPEG has no alpha channel.
        let resized = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
            _ => resized,
        };

        let mut out = Cursor::new(Vec::new());
        resized
            .write_to(&mut out, format)
            .map_err(|e| TransformError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }

    fn probe(&self, bytes: &[u8]) -> Result<ImageFields, TransformError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| TransformError::Decode(e.to_string()))?;
        let format = reader
            .format()
            .ok_or_else(|| TransformError::Unsupported("unrecognised image header".to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| TransformError::Decode(e.to_string()))?;

        Ok(ImageFields {
            width,
            height,
            format: format.extensions_str().first().copied().unwrap_or("unknown").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 100, 50]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn thumbnail_scales_to_target_width() {
        let thumb = DefaultTransformer.thumbnail(&png(400, 200), "photo.png", 200).unwrap();
        let fields = DefaultTransformer.probe(&thumb).unwrap();
        assert_eq!((fields.width, fields.height), (200, 100));
        assert_eq!(fields.format, "png");
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let thumb = DefaultTransformer.thumbnail(&png(50, 40), "small.png", 200).unwrap();
        let fields = DefaultTransformer.probe(&thumb).unwrap();
        assert_eq!((fields.width, fields.height), (50, 40));
    }

    #[test]
    fn thumbnail_reencodes_as_jpeg() {
        let thumb = DefaultTransformer.thumbnail(&png(300, 300), "photo.jpg", 200).unwrap();
        assert_eq!(DefaultTransformer.probe(&thumb).unwrap().format, "jpg");
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert_matches!(
            DefaultTransformer.thumbnail(b"not an image", "photo.jpg", 200),
            Err(TransformError::Decode(_))
        );
        assert_matches!(DefaultTransformer.probe(b"not an image"), Err(TransformError::Unsupported(_)));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        assert_matches!(
            DefaultTransformer.thumbnail(&png(10, 10), "photo.xyz", 200),
            Err(TransformError::Unsupported(_))
        );
    }
}
