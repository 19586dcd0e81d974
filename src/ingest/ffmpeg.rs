//! RTSP single-frame grab through an `ffmpeg` subprocess.
//!
//! Each grab spawns `ffmpeg`, asks for exactly one MJPEG frame on stdout and
//! waits at most the configured timeout. On timeout the child is killed and
//! reaped so no process outlives the cycle.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{redact, FrameSource, SourceConfig};
use crate::frame::Frame;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const MAX_STDERR_CHARS: usize = 400;

pub struct FfmpegSource {
    config: SourceConfig,
    name: String,
    frames: u64,
}

impl FfmpegSource {
    pub fn new(config: SourceConfig) -> Self {
        let name = format!(
            "ffmpeg({}, {})",
            redact(&config.url),
            config.rtsp_transport.as_str()
        );
        Self {
            config,
            name,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(["-rtsp_transport", self.config.rtsp_transport.as_str()])
            .args(["-i", self.config.url.as_str()])
            .args(["-an", "-frames:v", "1", "-q:v", "3"])
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl FrameSource for FfmpegSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab(&mut self) -> Result<Option<Frame>> {
        let child = self
            .command()
            .spawn()
            .with_context(|| format!("spawn {}", self.config.ffmpeg_bin))?;
        let output = wait_bounded(child, self.config.timeout, self.config.max_bytes)?;

        if !output.success {
            return Err(anyhow!(
                "ffmpeg failed ({}): {}",
                output.status,
                excerpt(&output.stderr)
            ));
        }
        if output.stdout.is_empty() {
            return Err(anyhow!("ffmpeg produced no frame: {}", excerpt(&output.stderr)));
        }
        let frame = Frame::from_encoded(&output.stdout).context("decode ffmpeg frame")?;
        self.frames += 1;
        Ok(Some(frame))
    }
}

struct BoundedOutput {
    success: bool,
    status: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Drain the child's pipes on helper threads (a full pipe would stall it)
/// and poll for exit until `timeout`.
fn wait_bounded(mut child: Child, timeout: Duration, max_bytes: usize) -> Result<BoundedOutput> {
    let stdout = child.stdout.take().map(|pipe| drain(pipe, max_bytes));
    let stderr = child.stderr.take().map(|pipe| drain(pipe, 64 * 1024));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().context("poll ffmpeg")? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("ffmpeg timed out after {:?}", timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = join_drain(stdout)?;
    let stderr = join_drain(stderr).unwrap_or_default();
    if stdout.len() > max_bytes {
        return Err(anyhow!("ffmpeg frame exceeds {} bytes", max_bytes));
    }
    Ok(BoundedOutput {
        success: status.success(),
        status: status.to_string(),
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(pipe: R, limit: usize) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        // One byte over the limit is enough to detect an oversized frame.
        pipe.take(limit as u64 + 1).read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn join_drain(handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow!("ffmpeg pipe reader panicked"))?
            .context("read ffmpeg output"),
        None => Ok(Vec::new()),
    }
}

fn excerpt(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .trim()
        .chars()
        .take(MAX_STDERR_CHARS)
        .collect()
}
