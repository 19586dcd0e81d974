//! Local still-image source.
//!
//! Re-reads the image on every grab, so replacing the file on disk changes
//! what the next cycle sees.

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::FrameSource;
use crate::frame::Frame;

pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file({})", path.display());
        Self { path, name }
    }
}

impl FrameSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab(&mut self) -> Result<Option<Frame>> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read frame file {}", self.path.display()))?;
        let frame = Frame::from_encoded(&bytes)
            .with_context(|| format!("decode frame file {}", self.path.display()))?;
        Ok(Some(frame))
    }
}
