use image::DynamicImage;
use std::collections::HashMap;

/// Bits kept per channel when bucketing pixels
const BUCKET_BITS: u8 = 4;

/// Most common color of an image as `#rrggbb`.
///
/// Pixels are grouped into coarse buckets; the winning bucket's pixels are
/// averaged so the result is a real color from the image rather than a
/// bucket corner. Returns `None` for empty images.
pub fn dominant_color(image: &DynamicImage) -> Option<String> {
    let rgb = image.to_rgb8();
    let shift = 8 - BUCKET_BITS;

    // bucket -> (count, sum r, sum g, sum b)
    let mut buckets: HashMap<(u8, u8, u8), (u64, u64, u64, u64)> = HashMap::new();
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let entry = buckets
            .entry((r >> shift, g >> shift, b >> shift))
            .or_insert((0, 0, 0, 0));
        entry.0 += 1;
        entry.1 += r as u64;
        entry.2 += g as u64;
        entry.3 += b as u64;
    }

    // Ties resolve on the bucket key so the result is deterministic
    let (_, (count, r, g, b)) = buckets
        .into_iter()
        .max_by(|(ka, a), (kb, b)| a.0.cmp(&b.0).then_with(|| kb.cmp(ka)))?;

    Some(format!(
        "#{:02x}{:02x}{:02x}",
        r / count,
        g / count,
        b / count
    ))
}
