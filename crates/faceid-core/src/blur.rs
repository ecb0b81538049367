//! Sharpness scoring via the variance of a Laplacian edge response.

use image::RgbImage;

/// Rec. 601 luma weights, matching the common BGR→gray conversion.
const LUMA_R: f64 = 0.299;
const LUMA_G: f64 = 0.587;
const LUMA_B: f64 = 0.114;

/// Sharpness score of an image region: variance of the 3×3 Laplacian
/// response over the grayscale rendition. Higher means sharper.
///
/// Responses are taken over interior pixels only, so regions smaller than
/// the kernel (including zero-area crops) score 0.0.
pub fn blur_score(region: &RgbImage) -> f64 {
    let (w, h) = region.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let w = w as usize;
    let h = h as usize;
    let mut gray = vec![0.0f64; w * h];
    for (i, px) in region.pixels().enumerate() {
        gray[i] = LUMA_R * px.0[0] as f64 + LUMA_G * px.0[1] as f64 + LUMA_B * px.0[2] as f64;
    }

    // 3x3 Laplacian: [0 1 0; 1 -4 1; 0 1 0]
    let count = (w - 2) * (h - 2);
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = gray[y * w + x];
            let resp = gray[(y - 1) * w + x]
                + gray[(y + 1) * w + x]
                + gray[y * w + x - 1]
                + gray[y * w + x + 1]
                - 4.0 * c;
            sum += resp;
            sum_sq += resp * resp;
        }
    }

    let mean = sum / count as f64;
    sum_sq / count as f64 - mean * mean
}
