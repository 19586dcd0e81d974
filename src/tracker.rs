//! Temporal debounce of zone observations.
//!
//! Each payload keeps the last `required` zone observations (including "no
//! zone"). A zone is confirmed only when the window is full and every entry
//! is that same zone. Single noisy reads therefore never relabel a tag.
//! Payloads that stop appearing are dropped by `end_cycle`.

use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
struct History {
    window: VecDeque<Option<String>>,
    last_seen: u64,
}

#[derive(Debug)]
pub struct ConsistencyTracker {
    required: usize,
    cycle: u64,
    histories: HashMap<String, History>,
}

impl ConsistencyTracker {
    /// `required` below 1 is raised to 1.
    pub fn new(required: usize) -> Self {
        Self {
            required: required.max(1),
            cycle: 0,
            histories: HashMap::new(),
        }
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Record one observation and return the confirmed zone, if any.
    pub fn observe(&mut self, payload: &str, zone: Option<&str>) -> Option<String> {
        let (required, cycle) = (self.required, self.cycle);
        let entry = self
            .histories
            .entry(payload.to_string())
            .or_insert_with(|| History {
                window: VecDeque::with_capacity(required),
                last_seen: 0,
            });
        entry.last_seen = cycle;
        let history = &mut entry.window;
        if history.len() == required {
            history.pop_front();
        }
        history.push_back(zone.map(str::to_string));

        if history.len() < required {
            return None;
        }
        let first = history.front()?.as_ref()?;
        if history.iter().all(|entry| entry.as_ref() == Some(first)) {
            Some(first.clone())
        } else {
            None
        }
    }

    /// Oldest first.
    pub fn history(&self, payload: &str) -> Vec<Option<String>> {
        self.histories
            .get(payload)
            .map(|h| h.window.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn forget(&mut self, payload: &str) -> bool {
        self.histories.remove(payload).is_some()
    }

    /// Close the current cycle and drop payloads unseen for `max_idle`
    /// cycles. Returns how many were dropped.
    pub fn end_cycle(&mut self, max_idle: u64) -> usize {
        let cycle = self.cycle;
        let before = self.histories.len();
        self.histories
            .retain(|_, h| cycle.saturating_sub(h.last_seen) < max_idle.max(1));
        self.cycle += 1;
        before - self.histories.len()
    }

    /// Number of payloads with in-flight history.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}
