//! QR tag inventory engine.
//!
//! This crate watches a single camera for QR-coded labels and keeps a durable
//! map of which tag was last confirmed in which named zone.
//!
//! # Architecture
//!
//! One periodic worker runs the full cycle and publishes an immutable
//! snapshot; a separate serving thread only ever reads that snapshot.
//!
//! 1. **Acquire**: a `FrameSource` yields one decoded frame (or nothing).
//! 2. **Detect**: `TagDetector` runs full-frame, zone-scoped and
//!    candidate-warp passes over several preprocessing variants.
//! 3. **Confirm**: `ZoneSet` classifies each centroid; `ConsistencyTracker`
//!    debounces noisy reads before anything is persisted.
//! 4. **Persist**: `InventoryStore` writes the full mapping only on change.
//! 5. **Publish**: `OverlayRenderer` annotates a copy of the frame and
//!    `StateServer` swaps in the new snapshot atomically.
//!
//! # Module Structure
//!
//! - `geometry`, `frame`: pixel-space primitives and the captured raster
//! - `ingest`: frame sources (ffmpeg/RTSP, HTTP snapshot, file, stub)
//! - `detect`: decoder backends, preprocessing variants and the multi-pass pipeline
//! - `zones`, `tracker`, `storage`: classification, confirmation, durable mapping
//! - `overlay`, `state`, `api`, `worker`: rendering, publication and serving

use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod overlay;
pub mod state;
pub mod storage;
pub mod tracker;
pub mod worker;
pub mod zones;

pub use config::InventoryConfig;
pub use detect::{DecoderBackend, DetectDiagnostics, Detection, DetectionReport, RqrrBackend, TagDetector};
pub use frame::Frame;
pub use geometry::{Point, Quad};
pub use ingest::FrameSource;
pub use overlay::OverlayRenderer;
pub use state::{ReadOutcome, Snapshot, StateServer};
pub use storage::{InventoryStore, MappingStore, PersistOutcome};
pub use tracker::ConsistencyTracker;
pub use worker::{CycleOutcome, StopSignal, Worker};
pub use zones::{Zone, ZoneSet};

/// Wall-clock seconds since the unix epoch.
pub fn now_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
