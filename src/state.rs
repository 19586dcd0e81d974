//! Published cycle snapshots.
//!
//! The worker builds a complete `Snapshot` and swaps it in under a write
//! lock held only for the pointer swap. Readers clone the `Arc` and release
//! the lock before touching any data, so a reader never blocks the worker and
//! never sees a frame paired with another cycle's detections.
//!
//! Lock order is `latest` then `health`. `publish` resets the failure streak
//! before releasing `latest`, so `status` never pairs a fresh snapshot with
//! the previous streak.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::detect::{DetectDiagnostics, Detection};
use crate::storage::Mapping;

/// Everything one successful cycle produced.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub cycle: u64,
    /// Wall-clock capture time (unix seconds).
    pub timestamp_s: f64,
    pub source: String,
    pub raw_jpeg: Vec<u8>,
    pub annotated_jpeg: Vec<u8>,
    pub detections: Vec<Detection>,
    pub diagnostics: DetectDiagnostics,
    /// Confirmed inventory as of this cycle.
    pub inventory: Mapping,
}

#[derive(Clone, Debug)]
pub enum ReadOutcome {
    NotReady,
    Ready(Arc<Snapshot>),
}

impl ReadOutcome {
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            ReadOutcome::Ready(snapshot) => Some(snapshot),
            ReadOutcome::NotReady => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadOutcome::Ready(_))
    }
}

/// A failed cycle as reported to the status surface.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleFailure {
    pub cycle: u64,
    pub timestamp_s: f64,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HealthStatus {
    pub cycles_attempted: u64,
    pub consecutive_failures: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_failure_ts: Option<f64>,
    pub last_success_ts: Option<f64>,
}

#[derive(Debug, Default)]
pub struct StateServer {
    latest: RwLock<Option<Arc<Snapshot>>>,
    health: Mutex<HealthStatus>,
}

impl StateServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole snapshot and clear the failure streak.
    pub fn publish(&self, snapshot: Snapshot) {
        let timestamp_s = snapshot.timestamp_s;
        let cycle = snapshot.cycle;
        let next = Arc::new(snapshot);
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(next);
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        health.cycles_attempted = health.cycles_attempted.max(cycle);
        health.consecutive_failures = 0;
        health.last_success_ts = Some(timestamp_s);
    }

    pub fn read(&self) -> ReadOutcome {
        let latest = self.latest.read().unwrap_or_else(PoisonError::into_inner);
        match latest.as_ref() {
            Some(snapshot) => ReadOutcome::Ready(Arc::clone(snapshot)),
            None => ReadOutcome::NotReady,
        }
    }

    /// Count a failed cycle. The last good snapshot stays published.
    pub fn record_failure(&self, failure: CycleFailure) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        health.cycles_attempted = health.cycles_attempted.max(failure.cycle);
        health.consecutive_failures += 1;
        health.total_failures += 1;
        health.last_error = Some(failure.reason);
        health.last_failure_ts = Some(failure.timestamp_s);
    }

    /// The current snapshot and the health that goes with it.
    pub fn status(&self) -> (ReadOutcome, HealthStatus) {
        let latest = self.latest.read().unwrap_or_else(PoisonError::into_inner);
        let health = self
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let outcome = match latest.as_ref() {
            Some(snapshot) => ReadOutcome::Ready(Arc::clone(snapshot)),
            None => ReadOutcome::NotReady,
        };
        (outcome, health)
    }

    pub fn health(&self) -> HealthStatus {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
