//! The periodic inventory cycle.
//!
//! One `Worker` owns every mutable component. Each cycle runs capture,
//! detect, classify/confirm, persist, render and publish to completion; the
//! stop signal is only consulted between cycles.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detect::{DetectionReport, TagDetector};
use crate::frame::{self, Frame};
use crate::ingest::FrameSource;
use crate::overlay::OverlayRenderer;
use crate::state::{CycleFailure, Snapshot, StateServer};
use crate::storage::{InventoryStore, PersistOutcome};
use crate::tracker::ConsistencyTracker;
use crate::zones::ZoneSet;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(300);
const STOP_POLL: Duration = Duration::from_millis(100);
/// Frames a payload may go unseen before its tracker history is dropped.
const TRACKER_IDLE_CYCLES: u64 = 100;

/// Cooperative shutdown flag shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `interval`, returning early (with `true`) once stopped.
    /// An interval past the clock's range waits for the stop alone.
    pub fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now().checked_add(interval);
        while !self.is_stopped() {
            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    STOP_POLL.min(deadline - now)
                }
                None => STOP_POLL,
            };
            std::thread::sleep(nap);
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    Published,
    SkippedNoFrame,
    AcquisitionFailed(String),
}

/// Components a worker is assembled from.
pub struct WorkerParts {
    pub source: Box<dyn FrameSource>,
    pub detector: TagDetector,
    pub zones: ZoneSet,
    pub tracker: ConsistencyTracker,
    pub inventory: InventoryStore,
    pub overlay: OverlayRenderer,
    pub state: Arc<StateServer>,
    pub jpeg_quality: u8,
    pub interval: Duration,
}

pub struct Worker {
    source: Box<dyn FrameSource>,
    detector: TagDetector,
    zones: ZoneSet,
    tracker: ConsistencyTracker,
    inventory: InventoryStore,
    overlay: OverlayRenderer,
    state: Arc<StateServer>,
    jpeg_quality: u8,
    interval: Duration,
    cycle: u64,
    published: u64,
    confirmations: u64,
}

impl Worker {
    pub fn new(parts: WorkerParts) -> Self {
        Self {
            source: parts.source,
            detector: parts.detector,
            zones: parts.zones,
            tracker: parts.tracker,
            inventory: parts.inventory,
            overlay: parts.overlay,
            state: parts.state,
            jpeg_quality: parts.jpeg_quality,
            interval: parts.interval,
            cycle: 0,
            published: 0,
            confirmations: 0,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn inventory(&self) -> &InventoryStore {
        &self.inventory
    }

    pub fn tracker(&self) -> &ConsistencyTracker {
        &self.tracker
    }

    /// Run one full cycle. Never panics on acquisition or persistence errors.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.cycle += 1;
        let cycle = self.cycle;

        if let Err(err) = self.inventory.retry_pending() {
            log::error!("inventory flush still failing: {:#}", err);
        }

        let frame = match self.source.grab() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::warn!("cycle {}: no frame from {}", cycle, self.source.name());
                self.fail(cycle, "no frame available".to_string());
                return CycleOutcome::SkippedNoFrame;
            }
            Err(err) => {
                let reason = format!("{:#}", err);
                log::warn!("cycle {}: frame acquisition failed: {}", cycle, reason);
                self.fail(cycle, reason.clone());
                return CycleOutcome::AcquisitionFailed(reason);
            }
        };

        let report = self.detector.detect(&frame, &self.zones);
        log::debug!(
            "cycle {}: {} tag(s) in {} ms, frame age {} ms",
            cycle,
            report.detections.len(),
            report.diagnostics.elapsed_ms,
            frame.age_ms()
        );
        self.confirm(&report);
        let evicted = self.tracker.end_cycle(TRACKER_IDLE_CYCLES);
        if evicted > 0 {
            log::debug!("cycle {}: dropped {} idle tracker histories", cycle, evicted);
        }

        match self.render(&frame, &report) {
            Ok((raw_jpeg, annotated_jpeg)) => {
                self.state.publish(Snapshot {
                    cycle,
                    timestamp_s: frame.timestamp_s(),
                    source: self.source.name().to_string(),
                    raw_jpeg,
                    annotated_jpeg,
                    detections: report.detections,
                    diagnostics: report.diagnostics,
                    inventory: self.inventory.snapshot(),
                });
                self.published += 1;
                CycleOutcome::Published
            }
            Err(err) => {
                let reason = format!("{:#}", err);
                log::error!("cycle {}: encoding failed: {}", cycle, reason);
                self.fail(cycle, reason.clone());
                CycleOutcome::AcquisitionFailed(reason)
            }
        }
    }

    /// Loop until `stop` fires, sleeping `interval` between cycles.
    pub fn run(&mut self, stop: &StopSignal) {
        let mut last_health_log = Instant::now();
        while !stop.is_stopped() {
            let started = Instant::now();
            let outcome = self.run_cycle();
            log::debug!(
                "cycle {} finished in {} ms: {:?}",
                self.cycle,
                started.elapsed().as_millis(),
                outcome
            );

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                self.log_health();
                last_health_log = Instant::now();
            }
            if stop.wait(self.interval) {
                break;
            }
        }
        log::info!("worker stopped after {} cycles", self.cycle);
    }

    fn confirm(&mut self, report: &DetectionReport) {
        for det in &report.detections {
            let confirmed = self.tracker.observe(&det.payload, det.zone.as_deref());
            log::info!(
                "tag {} at ({:.1}, {:.1}) zone={} history={:?}",
                det.payload,
                det.centroid.x,
                det.centroid.y,
                det.zone.as_deref().unwrap_or("-"),
                self.tracker.history(&det.payload)
            );
            let Some(zone) = confirmed else {
                continue;
            };
            match self.inventory.persist(&det.payload, &zone) {
                Ok(PersistOutcome::Updated { previous }) => {
                    self.confirmations += 1;
                    log::info!(
                        "confirmed {} in {} (was {})",
                        det.payload,
                        zone,
                        previous.as_deref().unwrap_or("unknown")
                    );
                }
                Ok(PersistOutcome::Unchanged) => {}
                Err(err) => log::error!("persist {} -> {} failed: {:#}", det.payload, zone, err),
            }
        }
    }

    fn render(&self, frame: &Frame, report: &DetectionReport) -> Result<(Vec<u8>, Vec<u8>)> {
        let raw = frame
            .encode_jpeg(self.jpeg_quality)
            .context("encode raw frame")?;
        let annotated = self.overlay.render(frame, &report.detections, &self.zones);
        let annotated =
            frame::encode_jpeg(&annotated, self.jpeg_quality).context("encode annotated frame")?;
        Ok((raw, annotated))
    }

    fn fail(&self, cycle: u64, reason: String) {
        self.state.record_failure(CycleFailure {
            cycle,
            timestamp_s: crate::now_s(),
            reason,
        });
    }

    fn log_health(&self) {
        let health = self.state.health();
        log::info!(
            "health cycles={} published={} failures={} consecutive_failures={} inventory={} confirmations={} pending_flush={} source={}",
            self.cycle,
            self.published,
            health.total_failures,
            health.consecutive_failures,
            self.inventory.len(),
            self.confirmations,
            self.inventory.has_pending_flush(),
            self.source.name()
        );
    }
}
