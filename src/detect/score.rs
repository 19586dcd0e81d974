//! Heuristic read-quality score.
//!
//! Informational only: the score decides which patches are logged or saved
//! for inspection and never whether a payload is reported.

use image::GrayImage;

const SIZE_WEIGHT: f32 = 0.4;
const SHARPNESS_WEIGHT: f32 = 0.35;
const CONTRAST_WEIGHT: f32 = 0.25;

/// Edge length (px) at which the size term saturates.
const SIZE_FULL_PX: f32 = 160.0;
/// Laplacian variance at which the sharpness term saturates.
const SHARPNESS_FULL: f32 = 1500.0;
/// Intensity standard deviation at which the contrast term saturates.
const CONTRAST_FULL: f32 = 80.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreParts {
    pub size: f32,
    pub sharpness: f32,
    pub contrast: f32,
}

impl ScoreParts {
    pub fn total(&self) -> f32 {
        (SIZE_WEIGHT * self.size + SHARPNESS_WEIGHT * self.sharpness + CONTRAST_WEIGHT * self.contrast)
            .clamp(0.0, 1.0)
    }
}

/// Score a tag patch whose apparent edge in the frame was `edge_px` pixels.
pub fn score_patch(patch: &GrayImage, edge_px: f32) -> ScoreParts {
    let size = if edge_px.is_finite() {
        (edge_px / SIZE_FULL_PX).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ScoreParts {
        size,
        sharpness: (laplacian_variance(patch) / SHARPNESS_FULL).clamp(0.0, 1.0),
        contrast: (std_dev(patch) / CONTRAST_FULL).clamp(0.0, 1.0),
    }
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
pub fn laplacian_variance(image: &GrayImage) -> f32 {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = image.as_raw();
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = px[y * w + x] as f64;
            let lap = px[(y - 1) * w + x] as f64
                + px[(y + 1) * w + x] as f64
                + px[y * w + x - 1] as f64
                + px[y * w + x + 1] as f64
                - 4.0 * c;
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }
    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0) as f32
}

pub fn std_dev(image: &GrayImage) -> f32 {
    let px = image.as_raw();
    if px.is_empty() {
        return 0.0;
    }
    let n = px.len() as f64;
    let mean = px.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = px.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    var.sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checker(side: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(side, side, |x, y| {
            Luma([if ((x / cell) + (y / cell)) % 2 == 0 { 0 } else { 255 }])
        })
    }

    #[test]
    fn flat_patch_scores_only_on_size() {
        let flat = GrayImage::from_pixel(32, 32, Luma([128]));
        let parts = score_patch(&flat, 80.0);
        assert_eq!(parts.sharpness, 0.0);
        assert_eq!(parts.contrast, 0.0);
        assert!((parts.total() - 0.2).abs() < 1e-4);
    }

    #[test]
    fn sharp_large_patch_scores_high() {
        let parts = score_patch(&checker(64, 4), 400.0);
        assert!(parts.total() > 0.9, "{:?}", parts);
    }

    #[test]
    fn blur_lowers_sharpness() {
        let sharp = checker(64, 4);
        let blurred = image::imageops::blur(&sharp, 2.5);
        assert!(laplacian_variance(&blurred) < laplacian_variance(&sharp));
    }

    #[test]
    fn score_is_bounded() {
        let parts = score_patch(&checker(16, 1), f32::INFINITY);
        let total = parts.total();
        assert!((0.0..=1.0).contains(&total));
        assert!(laplacian_variance(&GrayImage::new(2, 2)) == 0.0);
    }
}
