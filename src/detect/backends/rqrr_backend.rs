use anyhow::{anyhow, Result};
use image::GrayImage;
use std::panic::{self, AssertUnwindSafe};

use crate::detect::backend::{DecoderBackend, RawRead};
use crate::geometry::Quad;

/// Pure-Rust QR decoder backend built on `rqrr`.
#[derive(Debug, Default)]
pub struct RqrrBackend {
    scans: u64,
}

impl RqrrBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }
}

impl DecoderBackend for RqrrBackend {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn scan(&mut self, image: &GrayImage) -> Result<Vec<RawRead>> {
        self.scans += 1;
        let (w, h) = (image.width() as usize, image.height() as usize);
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }
        // Malformed grids can panic inside the decoder; contain it to this variant.
        panic::catch_unwind(AssertUnwindSafe(|| scan_grids(image, w, h)))
            .map_err(|_| anyhow!("rqrr panicked on {}x{} image", w, h))
    }
}

fn scan_grids(image: &GrayImage, w: usize, h: usize) -> Vec<RawRead> {
    let raw = image.as_raw();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| raw[y * w + x]);
    prepared
        .detect_grids()
        .into_iter()
        .map(|grid| {
            let quad = Quad::from_xy(grid.bounds.map(|p| (p.x as f32, p.y as f32)));
            match grid.decode() {
                Ok((_, content)) if !content.is_empty() => RawRead::decoded(quad, content),
                Ok(_) => RawRead::unresolved(quad),
                Err(err) => {
                    log::trace!("rqrr grid not decoded: {}", err);
                    RawRead::unresolved(quad)
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const BOX_001: &str = include_str!("../../../tests/fixtures/box_001.qr");

    fn render(matrix: &str, module_px: u32) -> GrayImage {
        let rows: Vec<&str> = matrix.lines().filter(|l| !l.trim().is_empty()).collect();
        let quiet = 4;
        let side = (rows.len() as u32 + quiet * 2) * module_px;
        let mut img = GrayImage::from_pixel(side, side, Luma([255]));
        for (my, row) in rows.iter().enumerate() {
            for (mx, cell) in row.trim().chars().enumerate() {
                if cell != '#' {
                    continue;
                }
                let x0 = (mx as u32 + quiet) * module_px;
                let y0 = (my as u32 + quiet) * module_px;
                for y in y0..y0 + module_px {
                    for x in x0..x0 + module_px {
                        img.put_pixel(x, y, Luma([0]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn decodes_printed_fixture() {
        let image = render(BOX_001, 6);
        let mut backend = RqrrBackend::new();
        let reads = backend.scan(&image).unwrap();
        let decoded: Vec<&str> = reads.iter().filter_map(|r| r.payload.as_deref()).collect();
        assert_eq!(decoded, vec!["BOX-001"]);

        let quad = reads.iter().find(|r| r.payload.is_some()).unwrap().quad;
        let side = image.width() as f32;
        let c = quad.centroid();
        assert!((c.x - side / 2.0).abs() < 8.0);
        assert!((c.y - side / 2.0).abs() < 8.0);
        assert!(quad.is_valid(8.0, 16.0));
    }

    #[test]
    fn blank_image_yields_nothing() {
        let mut backend = RqrrBackend::new();
        let reads = backend.scan(&GrayImage::from_pixel(64, 64, Luma([255]))).unwrap();
        assert!(reads.is_empty());
        assert!(backend.scan(&GrayImage::new(0, 0)).unwrap().is_empty());
        assert_eq!(backend.scans(), 2);
    }
}
