// Fixtures shared by the integration tests

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub use snapvault::test_support::tracing_init;

/// Small JPEG with a seed-dependent fill
pub fn jpeg_bytes(seed: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(40, 30, |x, y| {
        Rgb([seed, (x as u8).wrapping_mul(6), (y as u8).wrapping_mul(8)])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .expect("encode test jpeg");
    out
}

/// Write `files` into `dir` and return their paths in order
pub fn write_files(dir: &Path, files: &[(&str, Vec<u8>)]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(name, bytes)| {
            let path = dir.join(name);
            std::fs::write(&path, bytes).expect("write fixture");
            path
        })
        .collect()
}
