use anyhow::Result;
use image::GrayImage;

use crate::detect::backend::{DecoderBackend, RawRead};
use crate::geometry::Quad;

/// Stub backend for testing and `stub://` deployments.
///
/// Reports the same reads for every scanned image whose dimensions match the
/// frame it was configured for. Crops, upscales and warped patches have other
/// dimensions and therefore see nothing.
pub struct StubBackend {
    reads: Vec<RawRead>,
    frame_dims: Option<(u32, u32)>,
}

impl StubBackend {
    /// A backend that never finds anything.
    pub fn new() -> Self {
        Self {
            reads: Vec::new(),
            frame_dims: None,
        }
    }

    /// Report `reads` on any `width` x `height` image.
    pub fn with_reads(width: u32, height: u32, reads: Vec<RawRead>) -> Self {
        Self {
            reads,
            frame_dims: Some((width, height)),
        }
    }

    /// Convenience for a single decoded square tag.
    pub fn single_tag(width: u32, height: u32, payload: &str, x: f32, y: f32, side: f32) -> Self {
        Self::with_reads(width, height, vec![RawRead::decoded(Quad::square(x, y, side), payload)])
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn scan(&mut self, image: &GrayImage) -> Result<Vec<RawRead>> {
        match self.frame_dims {
            Some(dims) if dims == image.dimensions() => Ok(self.reads.clone()),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_only_reports_on_matching_dimensions() {
        let mut backend = StubBackend::single_tag(64, 48, "BOX-001", 10.0, 10.0, 20.0);
        assert_eq!(backend.scan(&GrayImage::new(64, 48)).unwrap().len(), 1);
        assert!(backend.scan(&GrayImage::new(128, 96)).unwrap().is_empty());
        assert!(StubBackend::new().scan(&GrayImage::new(64, 48)).unwrap().is_empty());
    }
}
