use crate::extract::ExtractError;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;

pub const DEFAULT_THUMBNAIL_EDGE: u32 = 512;
/// Color, blur and hash statistics run on a preview this size
const ANALYSIS_EDGE: u32 = 256;

/// Encoded JPEG thumbnail, held out-of-band from the queue item
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub mime_type: &'static str,
}

/// Result of decoding an original once
pub struct DecodedImage {
    pub source_width: u32,
    pub source_height: u32,
    pub thumbnail: Thumbnail,
    /// Small RGB preview used by the analysis stages
    pub preview: DynamicImage,
}

fn fit_within(image: &DynamicImage, max_edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= max_edge && height <= max_edge {
        image.clone()
    } else {
        image.thumbnail(max_edge, max_edge)
    }
}

#[cfg(feature = "heic")]
fn decode_original(data: &[u8]) -> Result<DynamicImage, ExtractError> {
    if crate::extract::heic::is_heif(data) {
        return crate::extract::heic::decode(data);
    }
    Ok(image::load_from_memory(data)?)
}

#[cfg(not(feature = "heic"))]
fn decode_original(data: &[u8]) -> Result<DynamicImage, ExtractError> {
    Ok(image::load_from_memory(data)?)
}

/// Decode an original and produce its thumbnail plus analysis preview.
///
/// CPU-bound; call from `spawn_blocking`.
pub fn decode_and_thumbnail(
    data: &[u8],
    name: &str,
    max_edge: u32,
) -> Result<DecodedImage, ExtractError> {
    if data.is_empty() {
        return Err(ExtractError::EmptyFile(name.to_string()));
    }

    let image = decode_original(data)?;
    let (source_width, source_height) = image.dimensions();

    let thumb = DynamicImage::ImageRgb8(fit_within(&image, max_edge).to_rgb8());
    let mut encoded = Vec::new();
    thumb.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)?;

    let preview = fit_within(&thumb, ANALYSIS_EDGE);

    Ok(DecodedImage {
        source_width,
        source_height,
        thumbnail: Thumbnail {
            data: Arc::new(encoded),
            width: thumb.width(),
            height: thumb.height(),
            mime_type: "image/jpeg",
        },
        preview,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_large_image_is_downscaled_keeping_aspect() {
        let decoded = decode_and_thumbnail(&png_bytes(1200, 600), "wide.png", 300).unwrap();
        assert_eq!((decoded.source_width, decoded.source_height), (1200, 600));
        assert_eq!(decoded.thumbnail.width, 300);
        assert_eq!(decoded.thumbnail.height, 150);
        assert_eq!(&decoded.thumbnail.data[..2], &[0xFF, 0xD8]);
        assert!(decoded.preview.width() <= ANALYSIS_EDGE);
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let decoded = decode_and_thumbnail(&png_bytes(40, 30), "small.png", 300).unwrap();
        assert_eq!(decoded.thumbnail.width, 40);
        assert_eq!(decoded.thumbnail.height, 30);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let result = decode_and_thumbnail(b"definitely not an image", "junk.jpg", 300);
        assert!(matches!(result, Err(ExtractError::Decode(_))));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let result = decode_and_thumbnail(&[], "empty.jpg", 300);
        assert!(matches!(result, Err(ExtractError::EmptyFile(_))));
    }
}
