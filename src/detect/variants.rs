//! Preprocessing variants fed to the decoder.
//!
//! No single rendition of a frame decodes every tag: glare, soft focus and
//! inverted prints each favour a different one. Every pass therefore scans
//! the same image through the whole configured variant list.

use image::imageops;
use image::GrayImage;
use std::borrow::Cow;
use std::fmt;

/// Constant subtracted from the local mean before adaptive thresholding,
/// biasing towards dark modules.
const ADAPTIVE_BIAS: i64 = 5;
const UNSHARP_SIGMA: f32 = 1.5;
const UNSHARP_THRESHOLD: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Variant {
    Raw,
    Inverted,
    Clahe { clip_limit: f32, tiles: u32 },
    Unsharp,
    Adaptive { radius: u32 },
    Otsu,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Raw => write!(f, "raw"),
            Variant::Inverted => write!(f, "inverted"),
            Variant::Clahe { .. } => write!(f, "clahe"),
            Variant::Unsharp => write!(f, "unsharp"),
            Variant::Adaptive { radius } => write!(f, "adaptive{}", radius),
            Variant::Otsu => write!(f, "otsu"),
        }
    }
}

impl Variant {
    /// The variant list in scan order.
    pub fn standard_set(adaptive_radii: &[u32], clip_limit: f32, tiles: u32) -> Vec<Variant> {
        let mut set = vec![
            Variant::Raw,
            Variant::Inverted,
            Variant::Clahe { clip_limit, tiles },
            Variant::Unsharp,
        ];
        set.extend(adaptive_radii.iter().map(|&radius| Variant::Adaptive { radius }));
        set.push(Variant::Otsu);
        set
    }

    pub fn apply<'a>(&self, image: &'a GrayImage) -> Cow<'a, GrayImage> {
        match *self {
            Variant::Raw => Cow::Borrowed(image),
            Variant::Inverted => {
                let mut out = image.clone();
                imageops::invert(&mut out);
                Cow::Owned(out)
            }
            Variant::Clahe { clip_limit, tiles } => Cow::Owned(clahe(image, clip_limit, tiles)),
            Variant::Unsharp => {
                Cow::Owned(imageops::unsharpen(image, UNSHARP_SIGMA, UNSHARP_THRESHOLD))
            }
            Variant::Adaptive { radius } => Cow::Owned(adaptive_threshold(image, radius)),
            Variant::Otsu => {
                let level = imageproc::contrast::otsu_level(image);
                Cow::Owned(binarize(image, level))
            }
        }
    }
}

/// Pixels strictly below `level` become black, the rest white.
pub fn binarize(image: &GrayImage, level: u8) -> GrayImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] < level { 0 } else { 255 };
    }
    out
}

/// Local-mean threshold over a `(2r+1)^2` window, computed via an integral image.
pub fn adaptive_threshold(image: &GrayImage, radius: u32) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let r = radius.max(1) as usize;
    let src = image.as_raw();
    let iw = w + 1;
    let mut integral = vec![0i64; iw * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0i64;
        for x in 0..w {
            row_sum += src[y * w + x] as i64;
            integral[(y + 1) * iw + x + 1] = row_sum + integral[y * iw + x + 1];
        }
    }

    let mut out = GrayImage::new(image.width(), image.height());
    let dst: &mut [u8] = &mut out;
    for y in 0..h {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(w);
            let area = ((y1 - y0) * (x1 - x0)) as i64;
            let sum = integral[y1 * iw + x1] - integral[y0 * iw + x1] - integral[y1 * iw + x0]
                + integral[y0 * iw + x0];
            let threshold = sum / area - ADAPTIVE_BIAS;
            dst[y * w + x] = if (src[y * w + x] as i64) < threshold { 0 } else { 255 };
        }
    }
    out
}

/// Contrast-limited adaptive histogram equalisation on a `tiles` x `tiles` grid.
///
/// Each tile's histogram is clipped at `clip_limit` times the mean bin count,
/// the excess redistributed evenly, and pixels are mapped by bilinear
/// interpolation between the four nearest tile CDFs.
pub fn clahe(image: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }
    let tiles = (tiles.max(1) as usize).min(w).min(h);
    let tile_w = w.div_ceil(tiles);
    let tile_h = h.div_ceil(tiles);
    let src = image.as_raw();

    let mut luts = vec![[0u8; 256]; tiles * tiles];
    for ty in 0..tiles {
        for tx in 0..tiles {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = ((tx + 1) * tile_w).min(w);
            let y1 = ((ty + 1) * tile_h).min(h);
            luts[ty * tiles + tx] = tile_lut(src, w, (x0, y0, x1, y1), clip_limit);
        }
    }

    let mut out = GrayImage::new(image.width(), image.height());
    let dst: &mut [u8] = &mut out;
    for y in 0..h {
        // Position relative to tile centres, clamped at the borders.
        let fy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).clamp(0.0, (tiles - 1) as f32);
        let ty0 = fy.floor() as usize;
        let ty1 = (ty0 + 1).min(tiles - 1);
        let wy = fy - ty0 as f32;
        for x in 0..w {
            let fx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).clamp(0.0, (tiles - 1) as f32);
            let tx0 = fx.floor() as usize;
            let tx1 = (tx0 + 1).min(tiles - 1);
            let wx = fx - tx0 as f32;

            let v = src[y * w + x] as usize;
            let a = luts[ty0 * tiles + tx0][v] as f32;
            let b = luts[ty0 * tiles + tx1][v] as f32;
            let c = luts[ty1 * tiles + tx0][v] as f32;
            let d = luts[ty1 * tiles + tx1][v] as f32;
            let top = a + (b - a) * wx;
            let bottom = c + (d - c) * wx;
            dst[y * w + x] = (top + (bottom - top) * wy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn tile_lut(src: &[u8], stride: usize, rect: (usize, usize, usize, usize), clip_limit: f32) -> [u8; 256] {
    let (x0, y0, x1, y1) = rect;
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for &v in &src[y * stride + x0..y * stride + x1] {
            hist[v as usize] += 1;
        }
    }
    let count = ((x1 - x0) * (y1 - y0)) as u32;
    let mut lut = [0u8; 256];
    if count == 0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return lut;
    }

    let limit = ((clip_limit.max(1.0) * count as f32 / 256.0).ceil() as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut cdf = 0u32;
    for (bin, slot) in hist.iter().zip(lut.iter_mut()) {
        cdf += bin;
        *slot = ((cdf as f32 * 255.0) / count as f32).round().min(255.0) as u8;
    }
    lut
}
