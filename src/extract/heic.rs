// HEIC/HEIF stills (the usual iPhone live-photo still) through libheif.
// Compiled with the `heic` feature; without it intake rejects these files.

use crate::extract::ExtractError;
use image::{DynamicImage, RgbImage};
use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

const HEIF_BRANDS: [&[u8; 4]; 8] = [
    b"heic", b"heix", b"heim", b"heis", b"hevc", b"hevx", b"mif1", b"msf1",
];

/// ISO BMFF `ftyp` box with a HEIF major brand
pub fn is_heif(data: &[u8]) -> bool {
    data.len() >= 12 && &data[4..8] == b"ftyp" && HEIF_BRANDS.iter().any(|b| &data[8..12] == *b)
}

pub fn decode(data: &[u8]) -> Result<DynamicImage, ExtractError> {
    let heic_err = |e: libheif_rs::HeifError| ExtractError::Heic(e.to_string());

    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(data).map_err(heic_err)?;
    let handle = ctx.primary_image_handle().map_err(heic_err)?;
    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(heic_err)?;

    let plane = decoded
        .planes()
        .interleaved
        .ok_or_else(|| ExtractError::Heic("no interleaved RGB plane".to_string()))?;

    let (width, height) = (plane.width, plane.height);
    let row_bytes = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in plane.data.chunks(plane.stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_bytes.min(row.len())]);
    }

    RgbImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| ExtractError::Heic("truncated RGB plane".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heif_brand_sniffing() {
        let mut header = vec![0, 0, 0, 24];
        header.extend_from_slice(b"ftypheic");
        header.extend_from_slice(&[0; 12]);
        assert!(is_heif(&header));

        header[8..12].copy_from_slice(b"isom");
        assert!(!is_heif(&header));
        assert!(!is_heif(b"\xFF\xD8\xFF"));
    }
}
