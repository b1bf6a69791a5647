use image::imageops::FilterType;
use image::DynamicImage;

/// 64-bit difference hash as 16 lowercase hex characters.
///
/// The image is reduced to 9x8 grayscale; each bit records whether a pixel
/// is brighter than its right-hand neighbour. Near-duplicates differ in few bits.
pub fn perceptual_hash(image: &DynamicImage) -> String {
    let small = image.resize_exact(9, 8, FilterType::Triangle).to_luma8();

    let mut hash: u64 = 0;
    for y in 0..8 {
        for x in 0..8 {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            hash = (hash << 1) | u64::from(left > right);
        }
    }

    format!("{:016x}", hash)
}

/// Number of differing bits between two hashes, `None` if either is malformed
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    let a = u64::from_str_radix(a, 16).ok()?;
    let b = u64::from_str_radix(b, 16).ok()?;
    Some((a ^ b).count_ones())
}
