//! Multi-pass tag detection.
//!
//! Pass 1 scans the whole frame through every variant. Pass 2 (optional)
//! rescans each zone crop, upscaled, so tags too small for the full frame
//! still resolve. Pass 3 perspective-warps each unresolved grid into an
//! upright square and tries the variants again. Reads are deduplicated by
//! payload, keeping the larger quad.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use super::backend::DecoderBackend;
use super::result::{DetectDiagnostics, Detection, DetectionReport, Pass};
use super::score::score_patch;
use super::variants::Variant;
use crate::frame::Frame;
use crate::geometry::{Point, Quad};
use crate::zones::ZoneSet;

/// Upscaled crops are capped to this many pixels per side.
const MAX_UPSCALED_SIDE: u32 = 4096;
/// Quiet margin around a warped patch, as a fraction of its side.
const WARP_MARGIN: f32 = 0.125;

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    pub zone_pass: bool,
    pub crop_padding_px: u32,
    pub upscale_factors: Vec<f32>,
    pub adaptive_radii: Vec<u32>,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: u32,
    pub max_candidates: usize,
    pub candidate_bucket_px: f32,
    pub warp_min_px: u32,
    pub warp_max_px: u32,
    pub min_edge_px: f32,
    pub min_area_px: f32,
    pub low_score_threshold: f32,
    /// Where low-score patches are written for inspection.
    pub debug_dir: Option<PathBuf>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            zone_pass: true,
            crop_padding_px: 24,
            upscale_factors: vec![2.0],
            adaptive_radii: vec![7, 15],
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            max_candidates: 12,
            candidate_bucket_px: 16.0,
            warp_min_px: 96,
            warp_max_px: 512,
            min_edge_px: 8.0,
            min_area_px: 16.0,
            low_score_threshold: 0.35,
            debug_dir: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Hit {
    quad: Quad,
    pass: Pass,
}

#[derive(Default)]
struct Accumulator {
    confirmed: Vec<(String, Hit)>,
    unresolved: Vec<Quad>,
}

impl Accumulator {
    /// Keep the larger-area quad per payload.
    fn offer(&mut self, payload: &str, quad: Quad, pass: Pass) {
        match self.confirmed.iter_mut().find(|(p, _)| p == payload) {
            Some((_, hit)) if quad.area() > hit.quad.area() => *hit = Hit { quad, pass },
            Some(_) => {}
            None => self.confirmed.push((payload.to_string(), Hit { quad, pass })),
        }
    }

    fn covers(&self, point: &Point) -> bool {
        self.confirmed
            .iter()
            .any(|(_, hit)| hit.quad.contains_bounds(point))
    }
}

pub struct TagDetector {
    settings: DetectorSettings,
    backend: Box<dyn DecoderBackend>,
    variants: Vec<Variant>,
}

impl TagDetector {
    pub fn new(settings: DetectorSettings, backend: Box<dyn DecoderBackend>) -> Self {
        let variants = Variant::standard_set(
            &settings.adaptive_radii,
            settings.clahe_clip_limit,
            settings.clahe_tiles,
        );
        Self {
            settings,
            backend,
            variants,
        }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Detect every readable tag in `frame` and classify it against `zones`.
    ///
    /// Never fails: variant errors and degenerate geometry are counted in
    /// the diagnostics and skipped.
    pub fn detect(&mut self, frame: &Frame, zones: &ZoneSet) -> DetectionReport {
        let started = Instant::now();
        let gray = frame.to_luma();
        let mut diag = DetectDiagnostics::default();
        let mut acc = Accumulator::default();

        diag.full_frame_reads =
            self.scan_variants(&gray, |q| q, Pass::FullFrame, &mut acc, &mut diag);

        if self.settings.zone_pass && !zones.is_empty() {
            diag.zone_reads = self.zone_pass(&gray, zones, &mut acc, &mut diag);
        }

        self.candidate_pass(&gray, &mut acc, &mut diag);

        let mut detections = Vec::with_capacity(acc.confirmed.len());
        for (payload, hit) in acc.confirmed {
            let centroid = hit.quad.centroid();
            let score = self.score(&gray, &payload, &hit.quad);
            detections.push(Detection {
                zone: zones.classify_name(centroid),
                payload,
                quad: hit.quad,
                centroid,
                score,
                pass: hit.pass,
            });
        }

        diag.elapsed_ms = started.elapsed().as_millis() as u64;
        DetectionReport {
            detections,
            diagnostics: diag,
        }
    }

    /// Run every variant over `image`, mapping geometry back to frame space.
    /// Returns the number of decoded reads.
    fn scan_variants(
        &mut self,
        image: &GrayImage,
        to_frame: impl Fn(Quad) -> Quad,
        pass: Pass,
        acc: &mut Accumulator,
        diag: &mut DetectDiagnostics,
    ) -> usize {
        let mut reads = 0;
        for variant in &self.variants {
            let prepared = variant.apply(image);
            let found = match self.backend.scan(&prepared) {
                Ok(found) => found,
                Err(err) => {
                    log::debug!("{} variant {} failed: {:#}", self.backend.name(), variant, err);
                    diag.variant_failures += 1;
                    continue;
                }
            };
            for read in found {
                let quad = to_frame(read.quad);
                if !quad.is_valid(self.settings.min_edge_px, self.settings.min_area_px) {
                    diag.degenerate_dropped += 1;
                    continue;
                }
                match read.payload.as_deref().map(str::trim) {
                    Some(payload) if !payload.is_empty() => {
                        acc.offer(payload, quad, pass);
                        reads += 1;
                    }
                    _ => acc.unresolved.push(quad),
                }
            }
        }
        reads
    }

    fn zone_pass(
        &mut self,
        gray: &GrayImage,
        zones: &ZoneSet,
        acc: &mut Accumulator,
        diag: &mut DetectDiagnostics,
    ) -> usize {
        let mut reads = 0;
        let mut factors = self.settings.upscale_factors.clone();
        if factors.is_empty() {
            factors.push(1.0);
        }
        for zone in zones.iter() {
            let Some((x, y, w, h)) =
                zone.crop_rect(self.settings.crop_padding_px, gray.width(), gray.height())
            else {
                continue;
            };
            let crop = imageops::crop_imm(gray, x, y, w, h).to_image();
            let origin = Point::new(x as f32, y as f32);

            for &factor in &factors {
                let (sw, sh) = scaled_dims(w, h, factor);
                let scaled;
                let image = if (sw, sh) == (w, h) {
                    &crop
                } else {
                    scaled = imageops::resize(&crop, sw, sh, FilterType::CatmullRom);
                    &scaled
                };
                let sx = sw as f32 / w as f32;
                let sy = sh as f32 / h as f32;
                reads += self.scan_variants(
                    image,
                    |q| q.to_frame(origin, sx, sy),
                    Pass::Zone,
                    acc,
                    diag,
                );
            }
        }
        reads
    }

    fn candidate_pass(&mut self, gray: &GrayImage, acc: &mut Accumulator, diag: &mut DetectDiagnostics) {
        let unresolved = std::mem::take(&mut acc.unresolved);
        let mut buckets: HashMap<(i32, i32), Quad> = HashMap::new();
        for quad in unresolved {
            if acc.covers(&quad.centroid()) {
                continue;
            }
            let key = quad.bucket_key(self.settings.candidate_bucket_px);
            match buckets.get(&key) {
                Some(existing) if existing.area() >= quad.area() => {}
                _ => {
                    buckets.insert(key, quad);
                }
            }
        }

        let mut candidates: Vec<Quad> = buckets.into_values().collect();
        diag.candidates_found = candidates.len();
        candidates.sort_by(|a, b| {
            b.area()
                .total_cmp(&a.area())
                .then_with(|| a.centroid().x.total_cmp(&b.centroid().x))
                .then_with(|| a.centroid().y.total_cmp(&b.centroid().y))
        });
        candidates.truncate(self.settings.max_candidates);

        for quad in candidates {
            diag.candidates_attempted += 1;
            let Some(patch) = self.warp_upright(gray, &quad) else {
                diag.degenerate_dropped += 1;
                continue;
            };
            if let Some(payload) = self.decode_patch(&patch, diag) {
                log::debug!("candidate at {:?} promoted as {}", quad.centroid(), payload);
                acc.offer(&payload, quad, Pass::Candidate);
                diag.candidates_promoted += 1;
            }
        }
    }

    /// First payload any variant decodes from a warped patch.
    fn decode_patch(&mut self, patch: &GrayImage, diag: &mut DetectDiagnostics) -> Option<String> {
        for variant in &self.variants {
            let prepared = variant.apply(patch);
            match self.backend.scan(&prepared) {
                Ok(reads) => {
                    let payload = reads
                        .into_iter()
                        .filter_map(|r| r.payload)
                        .map(|p| p.trim().to_string())
                        .find(|p| !p.is_empty());
                    if payload.is_some() {
                        return payload;
                    }
                }
                Err(err) => {
                    log::debug!("{} variant {} failed on candidate: {:#}", self.backend.name(), variant, err);
                    diag.variant_failures += 1;
                }
            }
        }
        None
    }

    /// Warp `quad` into an upright square with a white margin.
    fn warp_upright(&self, gray: &GrayImage, quad: &Quad) -> Option<GrayImage> {
        let min = self.settings.warp_min_px.max(8) as f32;
        let max = (self.settings.warp_max_px as f32).max(min);
        let side = (quad.longest_edge() * 2.0).clamp(min, max);
        let margin = (side * WARP_MARGIN).round();
        let total = (side + 2.0 * margin).round() as u32;

        let p = quad.points();
        let from = [(p[0].x, p[0].y), (p[1].x, p[1].y), (p[2].x, p[2].y), (p[3].x, p[3].y)];
        let to = [
            (margin, margin),
            (margin + side, margin),
            (margin + side, margin + side),
            (margin, margin + side),
        ];
        let projection = Projection::from_control_points(from, to)?;
        let mut out = GrayImage::new(total, total);
        warp_into(gray, &projection, Interpolation::Bilinear, Luma([255]), &mut out);
        Some(out)
    }

    fn score(&self, gray: &GrayImage, payload: &str, quad: &Quad) -> Option<f32> {
        let patch = self.warp_upright(gray, quad)?;
        let score = score_patch(&patch, quad.longest_edge()).total();
        if score < self.settings.low_score_threshold {
            log::debug!("low score {:.2} for {}", score, payload);
            if let Some(dir) = &self.settings.debug_dir {
                save_debug_patch(dir, payload, &patch);
            }
        }
        Some(score)
    }
}

fn scaled_dims(w: u32, h: u32, factor: f32) -> (u32, u32) {
    if !factor.is_finite() || factor <= 1.0 {
        return (w, h);
    }
    let sw = ((w as f32 * factor).round() as u32).clamp(1, MAX_UPSCALED_SIDE.max(w));
    let sh = ((h as f32 * factor).round() as u32).clamp(1, MAX_UPSCALED_SIDE.max(h));
    (sw, sh)
}

fn save_debug_patch(dir: &std::path::Path, payload: &str, patch: &GrayImage) {
    let safe: String = payload
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(48)
        .collect();
    let path = dir.join(format!("{}_{}.png", crate::now_s() as u64, safe));
    if let Err(err) = std::fs::create_dir_all(dir).map_err(anyhow::Error::from).and_then(|_| {
        patch.save(&path).map_err(anyhow::Error::from)
    }) {
        log::warn!("failed to save debug patch {}: {}", path.display(), err);
    }
}
