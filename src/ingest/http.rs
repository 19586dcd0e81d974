//! HTTP(S) snapshot source.
//!
//! Fetches one JPEG/PNG per grab, e.g. from a Home Assistant
//! `camera_proxy` endpoint. Requests carry an optional bearer token and are
//! bounded by the configured timeout and a body size cap.

use anyhow::{anyhow, Context, Result};
use std::io::Read;

use super::{redact, FrameSource, SourceConfig};
use crate::frame::Frame;

const MAX_ERROR_BODY_CHARS: usize = 200;

pub struct HttpSnapshotSource {
    config: SourceConfig,
    agent: ureq::Agent,
    name: String,
    frames: u64,
}

impl HttpSnapshotSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(anyhow!("http source timeout must be greater than zero"));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        let name = format!("http({})", redact(&config.url));
        Ok(Self {
            config,
            agent,
            name,
            frames: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn fetch(&self) -> Result<Vec<u8>> {
        let mut request = self.agent.get(&self.config.url);
        if let Some(token) = self.config.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
                return Err(anyhow!("snapshot request failed: {} {}", code, body.trim()));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("fetch snapshot from {}", redact(&self.config.url)))
            }
        };

        let max = self.config.max_bytes;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(max as u64 + 1)
            .read_to_end(&mut bytes)
            .context("read snapshot body")?;
        if bytes.len() > max {
            return Err(anyhow!("snapshot exceeds {} bytes", max));
        }
        if bytes.is_empty() {
            return Err(anyhow!("empty snapshot"));
        }
        Ok(bytes)
    }
}

impl FrameSource for HttpSnapshotSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab(&mut self) -> Result<Option<Frame>> {
        let bytes = self.fetch()?;
        let frame = Frame::from_encoded(&bytes).context("decode snapshot")?;
        self.frames += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Serve one canned response and report the request head.
    fn serve_once(status: &str, content_type: &str, body: Vec<u8>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        let status = status.to_string();
        let content_type = content_type.to_string();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let mut head = Vec::new();
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            tx.send(String::from_utf8_lossy(&head).into_owned()).unwrap();
            let header = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                content_type,
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        (format!("http://{}/api/camera_proxy/camera.shelf", addr), rx)
    }

    fn source(url: String, token: Option<&str>) -> HttpSnapshotSource {
        HttpSnapshotSource::new(SourceConfig {
            url,
            timeout: Duration::from_secs(5),
            bearer_token: token.map(str::to_string),
            ..SourceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn fetches_and_decodes_snapshot_with_token() {
        let jpeg = Frame::new(RgbImage::from_pixel(40, 30, Rgb([90, 90, 90])))
            .encode_jpeg(85)
            .unwrap();
        let (url, head) = serve_once("200 OK", "image/jpeg", jpeg);
        let mut src = source(url, Some("secret-token"));

        let frame = src.grab().unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (40, 30));
        let head = head.recv().unwrap().to_lowercase();
        assert!(head.contains("authorization: bearer secret-token"));
    }

    #[test]
    fn error_status_is_reported() {
        let (url, _head) = serve_once("401 Unauthorized", "text/plain", b"bad token".to_vec());
        let err = source(url, None).grab().unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("401"), "{}", msg);
    }

    #[test]
    fn oversized_body_is_rejected() {
        let (url, _head) = serve_once("200 OK", "image/jpeg", vec![0u8; 2048]);
        let mut src = HttpSnapshotSource::new(SourceConfig {
            url,
            timeout: Duration::from_secs(5),
            max_bytes: 1024,
            ..SourceConfig::default()
        })
        .unwrap();
        assert!(src.grab().unwrap_err().to_string().contains("exceeds"));
    }
}
