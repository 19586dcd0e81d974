use serde::Serialize;

use crate::geometry::{Point, Quad};

/// Which pass produced a detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    #[default]
    FullFrame,
    Zone,
    Candidate,
}

/// One committed tag read for the current frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    /// Decoded tag content, never empty.
    pub payload: String,
    pub quad: Quad,
    /// Mean of the quad vertices.
    pub centroid: Point,
    pub zone: Option<String>,
    pub score: Option<f32>,
    pub pass: Pass,
}

/// Per-frame counters for the detection passes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectDiagnostics {
    pub full_frame_reads: usize,
    pub zone_reads: usize,
    pub candidates_found: usize,
    pub candidates_attempted: usize,
    pub candidates_promoted: usize,
    pub degenerate_dropped: usize,
    pub variant_failures: usize,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    pub detections: Vec<Detection>,
    pub diagnostics: DetectDiagnostics,
}

impl DetectionReport {
    pub fn payloads(&self) -> Vec<&str> {
        self.detections.iter().map(|d| d.payload.as_str()).collect()
    }

    pub fn find(&self, payload: &str) -> Option<&Detection> {
        self.detections.iter().find(|d| d.payload == payload)
    }
}
