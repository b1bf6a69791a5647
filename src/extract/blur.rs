use crate::models::BlurInfo;
use image::DynamicImage;

/// Laplacian variance below this is reported as blurry
pub const BLUR_THRESHOLD: f64 = 100.0;

/// Variance of the 4-neighbour Laplacian over the luma channel.
/// Images smaller than 3x3 score 0.
pub fn laplacian_variance(image: &DynamicImage) -> f64 {
    let luma = image.to_luma8();
    let (width, height) = luma.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let at = |x: u32, y: u32| luma.get_pixel(x, y).0[0] as f64;

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }

    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

pub fn blur_info(image: &DynamicImage) -> BlurInfo {
    let score = laplacian_variance(image);
    BlurInfo {
        score: (score * 100.0).round() / 100.0,
        is_blurry: score < BLUR_THRESHOLD,
    }
}
