use anyhow::Result;
use image::{Rgb, RgbImage};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use qr_inventory::api::{ApiConfig, ApiHandle, ApiServer};
use qr_inventory::detect::{DetectDiagnostics, Detection, Pass};
use qr_inventory::frame;
use qr_inventory::geometry::Quad;
use qr_inventory::state::{CycleFailure, Snapshot, StateServer};

fn snapshot(cycle: u64) -> Snapshot {
    let quad = Quad::square(100.0, 100.0, 60.0);
    let image = RgbImage::from_pixel(64, 48, Rgb([120, 120, 120]));
    let jpeg = frame::encode_jpeg(&image, 80).expect("encode");
    Snapshot {
        cycle,
        timestamp_s: 1_700_000_000.0 + cycle as f64,
        source: "stub(test)".to_string(),
        raw_jpeg: jpeg.clone(),
        annotated_jpeg: jpeg,
        detections: vec![Detection {
            payload: "BOX-001".to_string(),
            quad,
            centroid: quad.centroid(),
            zone: Some("ShelfA".to_string()),
            score: Some(0.8),
            pass: Pass::FullFrame,
        }],
        diagnostics: DetectDiagnostics {
            full_frame_reads: 1,
            ..DetectDiagnostics::default()
        },
        inventory: [("BOX-001".to_string(), "ShelfA".to_string())]
            .into_iter()
            .collect(),
    }
}

fn request(addr: std::net::SocketAddr, method: &str, path: &str) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(request.as_bytes())?;
    read_response(&mut stream)
}

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    let body = response.get(split + 4..).unwrap_or_default().to_vec();
    Ok((headers, body))
}

struct TestApi {
    state: Arc<StateServer>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let state = Arc::new(StateServer::new());
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            mjpeg_interval: Duration::from_millis(20),
        };
        let api_handle = ApiServer::new(api_config, state.clone()).spawn()?;
        Ok(Self {
            state,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_is_always_available() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = request(api.addr(), "GET", "/health")?;
    assert!(headers.contains("200 OK"));
    assert!(String::from_utf8_lossy(&body).contains(r#""status":"ok""#));
    Ok(())
}

#[test]
fn endpoints_report_not_ready_before_first_cycle() -> Result<()> {
    let api = TestApi::new()?;
    for path in ["/snapshot.jpg", "/raw.jpg", "/detections", "/inventory"] {
        let (headers, _) = request(api.addr(), "GET", path)?;
        assert!(headers.contains("503 Service Unavailable"), "{path}: {headers}");
    }

    let (headers, body) = request(api.addr(), "GET", "/status")?;
    assert!(headers.contains("200 OK"));
    let status: Value = serde_json::from_slice(&body)?;
    assert_eq!(status["ready"], false);
    assert!(status["last_update_ts"].is_null());
    Ok(())
}

#[test]
fn published_snapshot_is_served_consistently() -> Result<()> {
    let api = TestApi::new()?;
    let snap = snapshot(7);
    let jpeg = snap.annotated_jpeg.clone();
    api.state.publish(snap);

    let (headers, body) = request(api.addr(), "GET", "/snapshot.jpg")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Content-Type: image/jpeg"));
    assert_eq!(body, jpeg);

    let (headers, body) = request(api.addr(), "GET", "/raw.jpg")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(&body[..2], &[0xFF, 0xD8]);

    let (_, body) = request(api.addr(), "GET", "/detections")?;
    let detections: Value = serde_json::from_slice(&body)?;
    assert_eq!(detections[0]["payload"], "BOX-001");
    assert_eq!(detections[0]["zone"], "ShelfA");
    assert_eq!(detections[0]["centroid"]["x"], 100.0);

    let (_, body) = request(api.addr(), "GET", "/inventory")?;
    let inventory: Value = serde_json::from_slice(&body)?;
    assert_eq!(inventory["BOX-001"], "ShelfA");

    let (_, body) = request(api.addr(), "GET", "/status")?;
    let status: Value = serde_json::from_slice(&body)?;
    assert_eq!(status["ready"], true);
    assert_eq!(status["cycle"], 7);
    assert_eq!(status["detections"], 1);
    assert_eq!(status["inventory_size"], 1);
    assert_eq!(status["last_update_ts"], 1_700_000_007.0);
    assert_eq!(status["diagnostics"]["full_frame_reads"], 1);
    Ok(())
}

#[test]
fn status_keeps_last_snapshot_through_failures() -> Result<()> {
    let api = TestApi::new()?;
    api.state.publish(snapshot(3));
    for cycle in 4..=6 {
        api.state.record_failure(CycleFailure {
            cycle,
            timestamp_s: 1_700_000_100.0,
            reason: "camera offline".to_string(),
        });
    }

    let (_, body) = request(api.addr(), "GET", "/status")?;
    let status: Value = serde_json::from_slice(&body)?;
    assert_eq!(status["ready"], true);
    assert_eq!(status["cycle"], 3);
    assert_eq!(status["consecutive_failures"], 3);
    assert_eq!(status["last_error"], "camera offline");

    api.state.publish(snapshot(7));
    let (_, body) = request(api.addr(), "GET", "/status")?;
    let status: Value = serde_json::from_slice(&body)?;
    assert_eq!(status["cycle"], 7);
    assert_eq!(status["consecutive_failures"], 0);
    assert_eq!(status["total_failures"], 3);
    Ok(())
}

#[test]
fn unknown_paths_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = request(api.addr(), "GET", "/events")?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = request(api.addr(), "POST", "/inventory")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn mjpeg_streams_annotated_frames() -> Result<()> {
    let api = TestApi::new()?;
    api.state.publish(snapshot(1));

    let mut stream = TcpStream::connect(api.addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(b"GET /mjpeg HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];
    while seen.windows(7).filter(|w| *w == b"--frame").count() < 2 {
        let n = stream.read(&mut buf)?;
        assert!(n > 0, "stream closed early");
        seen.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&seen);
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("Content-Type: image/jpeg"));
    drop(stream);
    Ok(())
}
