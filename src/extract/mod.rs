// # Leaf Extractors
//
// Pure `bytes -> derived value` functions used by the parse pipeline:
// - thumbnail: decode (HEIC via libheif with the `heic` feature), downscale, JPEG encode
// - exif: camera, capture time, GPS (behind the `ExifReader` seam)
// - color / blur / phash: pixel statistics on a small analysis preview
// - ocr: external engine behind the `OcrEngine` seam
//
// Everything here is synchronous and CPU-bound except OCR; the pipeline
// runs these on the blocking pool.

mod blur;
mod color;
mod exif;
#[cfg(feature = "heic")]
mod heic;
mod ocr;
mod phash;
mod thumbnail;

pub use blur::{blur_info, laplacian_variance, BLUR_THRESHOLD};
pub use color::dominant_color;
pub use exif::{ExifReader, KamadakExifReader};
pub use ocr::{NoopOcr, OcrEngine};
pub use phash::{hamming_distance, perceptual_hash};
pub use thumbnail::{decode_and_thumbnail, DecodedImage, Thumbnail, DEFAULT_THUMBNAIL_EDGE};

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("HEIC decode error: {0}")]
    Heic(String),
    #[error("EXIF error: {0}")]
    Exif(String),
    #[error("OCR error: {0}")]
    Ocr(String),
    #[error("File is empty: {0}")]
    EmptyFile(String),
}

/// The swappable leaf implementations one parse pipeline uses
#[derive(Clone)]
pub struct Extractors {
    pub exif: Arc<dyn ExifReader>,
    pub ocr: Arc<dyn OcrEngine>,
    /// Longest edge of generated thumbnails, in pixels
    pub thumbnail_edge: u32,
}

impl Default for Extractors {
    fn default() -> Self {
        Extractors {
            exif: Arc::new(KamadakExifReader),
            ocr: Arc::new(NoopOcr),
            thumbnail_edge: DEFAULT_THUMBNAIL_EDGE,
        }
    }
}

impl Extractors {
    pub fn with_thumbnail_edge(mut self, edge: u32) -> Self {
        self.thumbnail_edge = edge.max(16);
        self
    }
}
