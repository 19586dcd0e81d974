use anyhow::Result;
use image::GrayImage;

use crate::geometry::Quad;

/// One grid located by a decoder backend, in the scanned image's pixel space.
///
/// `payload` is `None` when the finder geometry was located but the data
/// could not be decoded; the pipeline retries those as candidates.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRead {
    pub quad: Quad,
    pub payload: Option<String>,
}

impl RawRead {
    pub fn decoded(quad: Quad, payload: impl Into<String>) -> Self {
        Self {
            quad,
            payload: Some(payload.into()),
        }
    }

    pub fn unresolved(quad: Quad) -> Self {
        Self { quad, payload: None }
    }
}

/// Multi-code decoder seam.
///
/// Backends receive a single-channel image that is only valid for the call
/// and must report every grid they locate, decoded or not. A backend error
/// only removes that variant's contribution; it never fails the frame.
pub trait DecoderBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Scan one intensity image.
    fn scan(&mut self, image: &GrayImage) -> Result<Vec<RawRead>>;
}
