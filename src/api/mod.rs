use anyhow::{anyhow, Result};
use serde_json::json;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::state::{ReadOutcome, Snapshot, StateServer};

const MAX_REQUEST_BYTES: usize = 8192;
const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Resend period for `/mjpeg` streams.
    pub mjpeg_interval: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            mjpeg_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Read-only HTTP surface over the published snapshot.
pub struct ApiServer {
    cfg: ApiConfig,
    state: Arc<StateServer>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: Arc<StateServer>) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|e| anyhow!("bind api address {}: {}", configured_addr, e))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let state = self.state.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, state, shutdown_thread) {
                log::error!("inventory api stopped: {}", err);
            }
        });
        log::info!("inventory api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: Arc<StateServer>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut streams: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                streams.retain(|handle| !handle.is_finished());
                match handle_connection(stream, &cfg, &state, &shutdown) {
                    Ok(Some(handle)) => streams.push(handle),
                    Ok(None) => {}
                    Err(err) => log::warn!("inventory api request failed: {}", err),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    for handle in streams {
        let _ = handle.join();
    }
    Ok(())
}

/// Serve one request. MJPEG streams are handed to their own thread.
fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &Arc<StateServer>,
    shutdown: &Arc<AtomicBool>,
) -> Result<Option<JoinHandle<()>>> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(None);
    }

    match request.path.as_str() {
        "/health" => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?,
        "/status" => {
            let body = status_body(state);
            write_response(&mut stream, 200, "application/json", &body)?;
        }
        "/snapshot.jpg" | "/raw.jpg" | "/detections" | "/inventory" => match state.read() {
            ReadOutcome::NotReady => {
                write_json_response(&mut stream, 503, r#"{"error":"not_ready"}"#)?;
            }
            ReadOutcome::Ready(snapshot) => serve_snapshot(&mut stream, &request.path, &snapshot)?,
        },
        "/mjpeg" => {
            let state = state.clone();
            let shutdown = shutdown.clone();
            let interval = cfg.mjpeg_interval;
            let handle = std::thread::spawn(move || {
                if let Err(err) = stream_mjpeg(stream, &state, &shutdown, interval) {
                    log::debug!("mjpeg client gone: {}", err);
                }
            });
            return Ok(Some(handle));
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?,
    }
    Ok(None)
}

fn serve_snapshot(stream: &mut TcpStream, path: &str, snapshot: &Snapshot) -> Result<()> {
    match path {
        "/snapshot.jpg" => write_response(stream, 200, "image/jpeg", &snapshot.annotated_jpeg),
        "/raw.jpg" => write_response(stream, 200, "image/jpeg", &snapshot.raw_jpeg),
        "/detections" => {
            let body = serde_json::to_vec(&snapshot.detections)?;
            write_response(stream, 200, "application/json", &body)
        }
        _ => {
            let body = serde_json::to_vec(&snapshot.inventory)?;
            write_response(stream, 200, "application/json", &body)
        }
    }
}

fn status_body(state: &StateServer) -> Vec<u8> {
    let (outcome, health) = state.status();
    let body = match outcome {
        ReadOutcome::Ready(snapshot) => json!({
            "ready": true,
            "last_update_ts": snapshot.timestamp_s,
            "cycle": snapshot.cycle,
            "detections": snapshot.detections.len(),
            "payloads": snapshot.detections.iter().map(|d| d.payload.as_str()).collect::<Vec<_>>(),
            "source": snapshot.source,
            "consecutive_failures": health.consecutive_failures,
            "total_failures": health.total_failures,
            "last_error": health.last_error,
            "inventory_size": snapshot.inventory.len(),
            "diagnostics": snapshot.diagnostics,
        }),
        ReadOutcome::NotReady => json!({
            "ready": false,
            "last_update_ts": null,
            "cycle": health.cycles_attempted,
            "detections": 0,
            "payloads": [],
            "source": null,
            "consecutive_failures": health.consecutive_failures,
            "total_failures": health.total_failures,
            "last_error": health.last_error,
            "inventory_size": 0,
            "diagnostics": null,
        }),
    };
    body.to_string().into_bytes()
}

/// Push the latest annotated frame every `interval` until the client leaves
/// or the server shuts down.
fn stream_mjpeg(
    mut stream: TcpStream,
    state: &StateServer,
    shutdown: &AtomicBool,
    interval: Duration,
) -> Result<()> {
    stream.set_write_timeout(Some(Duration::from_secs(2)))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-cache\r\nPragma: no-cache\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    while !shutdown.load(Ordering::SeqCst) {
        if let ReadOutcome::Ready(snapshot) = state.read() {
            let part = format!(
                "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                MJPEG_BOUNDARY,
                snapshot.annotated_jpeg.len()
            );
            stream.write_all(part.as_bytes())?;
            stream.write_all(&snapshot.annotated_jpeg)?;
            stream.write_all(b"\r\n")?;
            stream.flush()?;
        }
        std::thread::sleep(interval);
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
