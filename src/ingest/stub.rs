use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;

use super::FrameSource;
use crate::frame::Frame;

/// One scripted grab result.
#[derive(Clone, Debug)]
pub enum StubStep {
    Frame(RgbImage),
    Empty,
    Fail(String),
}

/// Stub source for testing and `stub://` dry runs.
///
/// A scripted source plays its steps in order and returns `Ok(None)` once
/// exhausted. A synthetic source returns a blank frame on every grab.
pub struct StubSource {
    name: String,
    script: VecDeque<StubStep>,
    synthetic: Option<(u32, u32)>,
    grabs: u64,
}

impl StubSource {
    pub fn synthetic(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: format!("stub({})", name),
            script: VecDeque::new(),
            synthetic: Some((width, height)),
            grabs: 0,
        }
    }

    pub fn scripted(steps: impl IntoIterator<Item = StubStep>) -> Self {
        Self {
            name: "stub(scripted)".to_string(),
            script: steps.into_iter().collect(),
            synthetic: None,
            grabs: 0,
        }
    }

    pub fn grabs(&self) -> u64 {
        self.grabs
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl FrameSource for StubSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab(&mut self) -> Result<Option<Frame>> {
        self.grabs += 1;
        if let Some((w, h)) = self.synthetic {
            return Ok(Some(Frame::new(RgbImage::from_pixel(w, h, Rgb([200, 200, 200])))));
        }
        match self.script.pop_front() {
            Some(StubStep::Frame(image)) => Ok(Some(Frame::new(image))),
            Some(StubStep::Empty) | None => Ok(None),
            Some(StubStep::Fail(reason)) => Err(anyhow!(reason)),
        }
    }
}
