//! Captured frames.
//!
//! A `Frame` lives for one worker cycle. The pipeline reads it, and anything
//! that must outlive the cycle (the published JPEGs) is encoded out of it.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, RgbImage};
use std::time::Instant;

use crate::now_s;

#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Wall-clock capture time (unix seconds).
    timestamp_s: f64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            timestamp_s: now_s(),
            captured_at: Instant::now(),
        }
    }

    /// Decode a JPEG/PNG byte buffer into a frame.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("decode frame image")?;
        Ok(Self::new(decoded.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn timestamp_s(&self) -> f64 {
        self.timestamp_s
    }

    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Single-channel intensity copy used by every detection pass.
    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.image, quality)
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let frame = Frame::new(RgbImage::from_pixel(64, 48, Rgb([200, 10, 10])));
        let jpeg = frame.encode_jpeg(85).unwrap();
        assert!(jpeg.starts_with(&[0xFF, 0xD8]));

        let decoded = Frame::from_encoded(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn luma_has_frame_dimensions() {
        let frame = Frame::new(RgbImage::new(31, 17));
        let gray = frame.to_luma();
        assert_eq!(gray.dimensions(), (31, 17));
    }

    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(Frame::from_encoded(b"not an image").is_err());
    }
}
