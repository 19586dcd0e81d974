//! Startup configuration.
//!
//! The config file is JSON (or TOML when the extension is `.toml`). Every
//! field is optional; defaults are applied once in `from_file`, environment
//! overrides in `apply_env`, and `validate` clamps or rejects what is left.
//! Bad scalar values warn and fall back to their default instead of failing.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::detect::DetectorSettings;
use crate::ingest::{RtspTransport, SourceConfig};
use crate::overlay::{BannerPosition, OverlaySettings};
use crate::storage::StoreKind;
use crate::zones::ZoneSet;

pub const CONFIG_ENV: &str = "INVENTORY_CONFIG";

const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_REQUIRED_CONSISTENCY: usize = 3;
const DEFAULT_STORE_PATH: &str = "/data/inventory.json";
const DEFAULT_BACKEND: &str = "rqrr";
const DEFAULT_JPEG_QUALITY: u8 = 85;
const MAX_UPSCALE_FACTOR: f32 = 8.0;
const MAX_INTERVAL_SECS: u64 = 86_400;
const MAX_SOURCE_TIMEOUT_SECS: u64 = 300;
const MAX_LABEL_CHARS: usize = 256;
const SUPERVISOR_TOKEN_ENV: &str = "SUPERVISOR_TOKEN";
const CAMERA_PROXY_BASE: &str = "http://supervisor/core/api/camera_proxy/";

#[derive(Debug, Deserialize, Default)]
struct InventoryConfigFile {
    interval_secs: Option<Value>,
    required_consistency: Option<Value>,
    source: Option<SourceConfigFile>,
    zones: Option<Value>,
    detector: Option<DetectorConfigFile>,
    overlay: Option<OverlayConfigFile>,
    store: Option<StoreConfigFile>,
    api: Option<ApiConfigFile>,
    // Flat keys accepted by older deployments and add-on options files.
    interval_seconds: Option<Value>,
    interval: Option<Value>,
    rtsp_url: Option<Value>,
    rtsp_transport: Option<Value>,
    camera_entity: Option<Value>,
    poll_interval_ms: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<Value>,
    rtsp_transport: Option<Value>,
    timeout_secs: Option<Value>,
    bearer_token: Option<Value>,
    ffmpeg_bin: Option<Value>,
    /// Home Assistant camera entity fetched through the supervisor proxy.
    camera_entity: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<Value>,
    zone_pass: Option<Value>,
    crop_padding_px: Option<Value>,
    upscale_factors: Option<Value>,
    adaptive_radii: Option<Value>,
    clahe_clip_limit: Option<Value>,
    clahe_tiles: Option<Value>,
    max_candidates: Option<Value>,
    candidate_bucket_px: Option<Value>,
    warp_min_px: Option<Value>,
    warp_max_px: Option<Value>,
    min_edge_px: Option<Value>,
    min_area_px: Option<Value>,
    low_score_threshold: Option<Value>,
    debug_dir: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<Value>,
    font_size: Option<Value>,
    padding: Option<Value>,
    max_label_chars: Option<Value>,
    banner: Option<Value>,
    #[serde(alias = "position")]
    banner_position: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    kind: Option<Value>,
    path: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<Value>,
    jpeg_quality: Option<Value>,
    mjpeg_interval_ms: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct InventoryConfig {
    pub interval: Duration,
    pub required_consistency: usize,
    pub source: SourceConfig,
    pub zones: ZoneSet,
    pub backend: String,
    pub detector: DetectorSettings,
    pub overlay: OverlaySettings,
    pub store: StoreSettings,
    pub api: ApiConfig,
    pub jpeg_quality: u8,
    /// File the configuration was read from, if any.
    pub config_path: Option<PathBuf>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self::from_file(InventoryConfigFile::default())
    }
}

impl InventoryConfig {
    /// Load from `path`, falling back to `INVENTORY_CONFIG`.
    ///
    /// A missing file yields defaults with a warning. A file that exists but
    /// does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var(CONFIG_ENV)
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };
        let file_cfg = match config_path.as_deref() {
            Some(path) if path.exists() => read_config_file(path)?,
            Some(path) => {
                log::warn!("config file {} not found; using defaults", path.display());
                InventoryConfigFile::default()
            }
            None => InventoryConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.config_path = config_path.filter(|p| p.exists());
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a JSON document without consulting the environment.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: InventoryConfigFile = serde_json::from_str(raw).context("invalid config JSON")?;
        let mut cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InventoryConfigFile) -> Self {
        let interval_secs = file
            .interval_secs
            .as_ref()
            .or(file.interval_seconds.as_ref())
            .or(file.interval.as_ref())
            .and_then(|v| read_f64("interval_secs", v))
            .map(|secs| secs.max(0.0) as u64)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        let required_consistency = file
            .required_consistency
            .as_ref()
            .and_then(|v| read_i64("required_consistency", v))
            .map(|n| n.max(0) as usize)
            .unwrap_or(DEFAULT_REQUIRED_CONSISTENCY);

        let source = source_from_file(
            file.source.unwrap_or_default(),
            file.rtsp_url.as_ref(),
            file.rtsp_transport.as_ref(),
            file.camera_entity.as_ref(),
        );
        let zones = file
            .zones
            .as_ref()
            .map(ZoneSet::from_config_value)
            .unwrap_or_default();
        let detector_file = file.detector.unwrap_or_default();
        let backend = detector_file
            .backend
            .as_ref()
            .and_then(|v| read_string("detector.backend", v))
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let detector = detector_from_file(detector_file);
        let overlay = overlay_from_file(file.overlay.unwrap_or_default());

        let store_file = file.store.unwrap_or_default();
        let store = StoreSettings {
            kind: store_file
                .kind
                .as_ref()
                .and_then(|v| read_string("store.kind", v))
                .and_then(|kind| {
                    let parsed = StoreKind::parse(&kind);
                    if parsed.is_none() {
                        log::warn!("unknown store.kind '{}'; using json", kind);
                    }
                    parsed
                })
                .unwrap_or_default(),
            path: store_file
                .path
                .as_ref()
                .and_then(|v| read_string("store.path", v))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
        };

        let api_file = file.api.unwrap_or_default();
        let mut api = ApiConfig::default();
        if let Some(addr) = api_file.addr.as_ref().and_then(|v| read_string("api.addr", v)) {
            api.addr = addr;
        }
        if let Some(ms) = api_file
            .mjpeg_interval_ms
            .as_ref()
            .or(file.poll_interval_ms.as_ref())
            .and_then(|v| read_u64("api.mjpeg_interval_ms", v))
        {
            api.mjpeg_interval = Duration::from_millis(ms);
        }
        let jpeg_quality = api_file
            .jpeg_quality
            .as_ref()
            .and_then(|v| read_u64("api.jpeg_quality", v))
            .map(|q| q.min(u8::MAX as u64) as u8)
            .unwrap_or(DEFAULT_JPEG_QUALITY);

        Self {
            interval: Duration::from_secs(interval_secs),
            required_consistency,
            source,
            zones,
            backend,
            detector,
            overlay,
            store,
            api,
            jpeg_quality,
            config_path: None,
        }
    }

    fn apply_env(&mut self) {
        if let Some(url) = env_value("INVENTORY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(addr) = env_value("INVENTORY_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(raw) = env_value("INVENTORY_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => self.interval = Duration::from_secs(secs),
                Err(_) => log::warn!("INVENTORY_INTERVAL_SECS '{}' is not a whole number; ignored", raw),
            }
        }
        if let Some(raw) = env_value("INVENTORY_REQUIRED_CONSISTENCY") {
            match raw.parse::<i64>() {
                Ok(n) => self.required_consistency = n.max(0) as usize,
                Err(_) => log::warn!("INVENTORY_REQUIRED_CONSISTENCY '{}' is not an integer; ignored", raw),
            }
        }
        if let Some(path) = env_value("INVENTORY_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if self.source.bearer_token.is_none() && self.source.url.starts_with(CAMERA_PROXY_BASE) {
            self.source.bearer_token = env_value(SUPERVISOR_TOKEN_ENV);
            if self.source.bearer_token.is_none() {
                log::warn!("{} is not set; camera proxy requests will be unauthenticated", SUPERVISOR_TOKEN_ENV);
            }
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.required_consistency < 1 {
            log::warn!(
                "required_consistency {} is below 1; using 1",
                self.required_consistency
            );
            self.required_consistency = 1;
        }
        if self.interval < Duration::from_secs(1) {
            log::warn!("interval_secs below 1; using 1");
            self.interval = Duration::from_secs(1);
        }
        if self.interval > Duration::from_secs(MAX_INTERVAL_SECS) {
            log::warn!("interval_secs above {}; using {}", MAX_INTERVAL_SECS, MAX_INTERVAL_SECS);
            self.interval = Duration::from_secs(MAX_INTERVAL_SECS);
        }
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source.url must not be empty"));
        }
        if self.source.timeout.is_zero() {
            log::warn!("source.timeout_secs must be positive; using 10");
            self.source.timeout = SourceConfig::default().timeout;
        }
        if self.source.timeout > Duration::from_secs(MAX_SOURCE_TIMEOUT_SECS) {
            log::warn!(
                "source.timeout_secs above {}; using {}",
                MAX_SOURCE_TIMEOUT_SECS,
                MAX_SOURCE_TIMEOUT_SECS
            );
            self.source.timeout = Duration::from_secs(MAX_SOURCE_TIMEOUT_SECS);
        }
        if !matches!(self.backend.trim().to_ascii_lowercase().as_str(), "rqrr" | "stub") {
            log::warn!("unknown detector.backend '{}'; using {}", self.backend, DEFAULT_BACKEND);
            self.backend = DEFAULT_BACKEND.to_string();
        }
        validate_detector(&mut self.detector);
        if !(1..=100).contains(&self.jpeg_quality) {
            log::warn!("api.jpeg_quality {} out of range; using {}", self.jpeg_quality, DEFAULT_JPEG_QUALITY);
            self.jpeg_quality = DEFAULT_JPEG_QUALITY;
        }
        if self.overlay.font_size <= 0.0 || !self.overlay.font_size.is_finite() {
            self.overlay.font_size = OverlaySettings::default().font_size;
        }
        if self.overlay.max_label_chars == 0 {
            self.overlay.max_label_chars = OverlaySettings::default().max_label_chars;
        }
        if self.overlay.max_label_chars > MAX_LABEL_CHARS {
            log::warn!("overlay.max_label_chars above {}; using {}", MAX_LABEL_CHARS, MAX_LABEL_CHARS);
            self.overlay.max_label_chars = MAX_LABEL_CHARS;
        }
        if self.api.mjpeg_interval.is_zero() {
            self.api.mjpeg_interval = ApiConfig::default().mjpeg_interval;
        }
        self.api
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api.addr '{}': {}", self.api.addr, e))?;
        Ok(())
    }
}

fn source_from_file(
    file: SourceConfigFile,
    legacy_url: Option<&Value>,
    legacy_transport: Option<&Value>,
    legacy_entity: Option<&Value>,
) -> SourceConfig {
    let mut source = SourceConfig::default();
    let url = file
        .url
        .as_ref()
        .or(legacy_url)
        .and_then(|v| read_string("source.url", v))
        .filter(|url| !url.is_empty());
    let entity = file
        .camera_entity
        .as_ref()
        .or(legacy_entity)
        .and_then(|v| read_string("source.camera_entity", v))
        .filter(|entity| !entity.is_empty());
    match (url, entity) {
        (Some(url), _) => source.url = url,
        (None, Some(entity)) => source.url = format!("{}{}", CAMERA_PROXY_BASE, entity),
        (None, None) => {}
    }
    if let Some(raw) = file
        .rtsp_transport
        .as_ref()
        .or(legacy_transport)
        .and_then(|v| read_string("source.rtsp_transport", v))
    {
        match RtspTransport::parse(&raw) {
            Some(transport) => source.rtsp_transport = transport,
            None => log::warn!("unknown rtsp_transport '{}'; using tcp", raw),
        }
    }
    if let Some(secs) = file
        .timeout_secs
        .as_ref()
        .and_then(|v| read_f64("source.timeout_secs", v))
    {
        if secs > 0.0 {
            // Out-of-range values saturate here and are clamped in `validate`.
            source.timeout = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        } else {
            log::warn!("source.timeout_secs must be positive; using default");
        }
    }
    source.bearer_token = file
        .bearer_token
        .as_ref()
        .and_then(|v| read_string("source.bearer_token", v))
        .filter(|token| !token.is_empty());
    if let Some(bin) = file
        .ffmpeg_bin
        .as_ref()
        .and_then(|v| read_string("source.ffmpeg_bin", v))
    {
        source.ffmpeg_bin = bin;
    }
    source
}

fn detector_from_file(file: DetectorConfigFile) -> DetectorSettings {
    let mut s = DetectorSettings::default();
    if let Some(v) = file.zone_pass.as_ref().and_then(|v| read_bool("detector.zone_pass", v)) {
        s.zone_pass = v;
    }
    if let Some(v) = file
        .crop_padding_px
        .as_ref()
        .and_then(|v| read_u64("detector.crop_padding_px", v))
    {
        s.crop_padding_px = v as u32;
    }
    if let Some(v) = file
        .upscale_factors
        .as_ref()
        .and_then(|v| read_list("detector.upscale_factors", v))
    {
        s.upscale_factors = v.into_iter().map(|f| f as f32).collect();
    }
    if let Some(v) = file
        .adaptive_radii
        .as_ref()
        .and_then(|v| read_list("detector.adaptive_radii", v))
    {
        s.adaptive_radii = v.into_iter().filter(|r| *r >= 1.0).map(|r| r as u32).collect();
    }
    if let Some(v) = file
        .clahe_clip_limit
        .as_ref()
        .and_then(|v| read_f64("detector.clahe_clip_limit", v))
    {
        s.clahe_clip_limit = v as f32;
    }
    if let Some(v) = file.clahe_tiles.as_ref().and_then(|v| read_u64("detector.clahe_tiles", v)) {
        s.clahe_tiles = v as u32;
    }
    if let Some(v) = file
        .max_candidates
        .as_ref()
        .and_then(|v| read_u64("detector.max_candidates", v))
    {
        s.max_candidates = v as usize;
    }
    if let Some(v) = file
        .candidate_bucket_px
        .as_ref()
        .and_then(|v| read_f64("detector.candidate_bucket_px", v))
    {
        s.candidate_bucket_px = v as f32;
    }
    if let Some(v) = file.warp_min_px.as_ref().and_then(|v| read_u64("detector.warp_min_px", v)) {
        s.warp_min_px = v as u32;
    }
    if let Some(v) = file.warp_max_px.as_ref().and_then(|v| read_u64("detector.warp_max_px", v)) {
        s.warp_max_px = v as u32;
    }
    if let Some(v) = file.min_edge_px.as_ref().and_then(|v| read_f64("detector.min_edge_px", v)) {
        s.min_edge_px = v as f32;
    }
    if let Some(v) = file.min_area_px.as_ref().and_then(|v| read_f64("detector.min_area_px", v)) {
        s.min_area_px = v as f32;
    }
    if let Some(v) = file
        .low_score_threshold
        .as_ref()
        .and_then(|v| read_f64("detector.low_score_threshold", v))
    {
        s.low_score_threshold = v as f32;
    }
    s.debug_dir = file
        .debug_dir
        .as_ref()
        .and_then(|v| read_string("detector.debug_dir", v))
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from);
    s
}

fn validate_detector(s: &mut DetectorSettings) {
    let defaults = DetectorSettings::default();
    let before = s.upscale_factors.len();
    s.upscale_factors
        .retain(|f| f.is_finite() && *f >= 1.0 && *f <= MAX_UPSCALE_FACTOR);
    if s.upscale_factors.len() != before {
        log::warn!(
            "detector.upscale_factors must lie in [1, {}]; dropped {} value(s)",
            MAX_UPSCALE_FACTOR,
            before - s.upscale_factors.len()
        );
    }
    if s.zone_pass && s.upscale_factors.is_empty() {
        log::warn!("detector.upscale_factors is empty; zones are scanned at native size");
    }
    if s.clahe_clip_limit <= 0.0 || !s.clahe_clip_limit.is_finite() {
        log::warn!("detector.clahe_clip_limit must be positive; using {}", defaults.clahe_clip_limit);
        s.clahe_clip_limit = defaults.clahe_clip_limit;
    }
    if s.clahe_tiles == 0 {
        s.clahe_tiles = defaults.clahe_tiles;
    }
    if s.candidate_bucket_px <= 0.0 || !s.candidate_bucket_px.is_finite() {
        s.candidate_bucket_px = defaults.candidate_bucket_px;
    }
    if s.warp_min_px == 0 || s.warp_max_px == 0 {
        s.warp_min_px = defaults.warp_min_px;
        s.warp_max_px = defaults.warp_max_px;
    }
    if s.warp_min_px > s.warp_max_px {
        log::warn!("detector.warp_min_px exceeds warp_max_px; swapping");
        std::mem::swap(&mut s.warp_min_px, &mut s.warp_max_px);
    }
    if s.min_edge_px < 1.0 || !s.min_edge_px.is_finite() {
        s.min_edge_px = defaults.min_edge_px;
    }
    if s.min_area_px < 1.0 || !s.min_area_px.is_finite() {
        s.min_area_px = defaults.min_area_px;
    }
    if !(0.0..=1.0).contains(&s.low_score_threshold) {
        log::warn!(
            "detector.low_score_threshold must lie in [0, 1]; using {}",
            defaults.low_score_threshold
        );
        s.low_score_threshold = defaults.low_score_threshold;
    }
}

fn overlay_from_file(file: OverlayConfigFile) -> OverlaySettings {
    let mut s = OverlaySettings::default();
    if let Some(path) = file.font_path.as_ref().and_then(|v| read_string("overlay.font_path", v)) {
        s.font_path = if path.is_empty() { None } else { Some(PathBuf::from(path)) };
    }
    if let Some(v) = file.font_size.as_ref().and_then(|v| read_f64("overlay.font_size", v)) {
        s.font_size = v as f32;
    }
    if let Some(v) = file.padding.as_ref().and_then(|v| read_u64("overlay.padding", v)) {
        s.padding = v as u32;
    }
    if let Some(v) = file
        .max_label_chars
        .as_ref()
        .and_then(|v| read_u64("overlay.max_label_chars", v))
    {
        s.max_label_chars = v as usize;
    }
    if let Some(v) = file.banner.as_ref().and_then(|v| read_bool("overlay.banner", v)) {
        s.banner = v;
    }
    if let Some(raw) = file
        .banner_position
        .as_ref()
        .and_then(|v| read_string("overlay.banner_position", v))
    {
        match BannerPosition::parse(&raw) {
            Some(position) => s.banner_position = position,
            None => log::warn!("unknown overlay.banner_position '{}'; using bottom_left", raw),
        }
    }
    s
}

fn read_config_file(path: &Path) -> Result<InventoryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        let value: toml::Value = toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
        let json = serde_json::to_value(value)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
        serde_json::from_value(json)
    } else {
        serde_json::from_str(&raw)
    };
    cfg.map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_string(field: &str, value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => {
            log::warn!("{} must be a string; using default", field);
            None
        }
    }
}

fn read_f64(field: &str, value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed.filter(|v| v.is_finite()) {
        Some(v) => Some(v),
        None => {
            log::warn!("{} must be a number, got {}; using default", field, value);
            None
        }
    }
}

fn read_i64(field: &str, value: &Value) -> Option<i64> {
    read_f64(field, value).map(|v| v.trunc() as i64)
}

fn read_u64(field: &str, value: &Value) -> Option<u64> {
    match read_f64(field, value) {
        Some(v) if v >= 0.0 => Some(v.trunc() as u64),
        Some(v) => {
            log::warn!("{} must not be negative, got {}; using default", field, v);
            None
        }
        None => None,
    }
}

fn read_bool(field: &str, value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => {
                log::warn!("{} must be a boolean, got '{}'; using default", field, s);
                None
            }
        },
        _ => {
            log::warn!("{} must be a boolean; using default", field);
            None
        }
    }
}

/// A list of numbers, or a single number / comma separated string.
fn read_list(field: &str, value: &Value) -> Option<Vec<f64>> {
    let items: Vec<Value> = match value {
        Value::Null => return None,
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        Value::Number(_) => vec![value.clone()],
        _ => {
            log::warn!("{} must be a list of numbers; using default", field);
            return None;
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        out.push(read_f64(field, item)?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = InventoryConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert_eq!(cfg.required_consistency, 3);
        assert_eq!(cfg.store.kind, StoreKind::Json);
        assert_eq!(cfg.store.path, PathBuf::from("/data/inventory.json"));
        assert_eq!(cfg.api.addr, "0.0.0.0:8080");
        assert_eq!(cfg.jpeg_quality, 85);
        assert_eq!(cfg.backend, "rqrr");
        assert!(cfg.zones.is_empty());
    }

    #[test]
    fn strings_are_coerced_and_bad_values_fall_back() {
        let cfg = InventoryConfig::from_json_str(
            r#"{
                "interval_secs": "15",
                "required_consistency": "two",
                "detector": { "zone_pass": "off", "upscale_factors": "2, 3", "max_candidates": -4 },
                "overlay": { "position": "top_right", "font_size": "big" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(15));
        assert_eq!(cfg.required_consistency, 3);
        assert!(!cfg.detector.zone_pass);
        assert_eq!(cfg.detector.upscale_factors, vec![2.0, 3.0]);
        assert_eq!(cfg.detector.max_candidates, 12);
        assert_eq!(cfg.overlay.banner_position, BannerPosition::TopRight);
        assert_eq!(cfg.overlay.font_size, 18.0);
    }

    #[test]
    fn required_consistency_clamps_to_one() {
        let cfg = InventoryConfig::from_json_str(r#"{"required_consistency": 0}"#).unwrap();
        assert_eq!(cfg.required_consistency, 1);
        let cfg = InventoryConfig::from_json_str(r#"{"required_consistency": -3}"#).unwrap();
        assert_eq!(cfg.required_consistency, 1);
    }

    #[test]
    fn legacy_flat_keys_are_honoured() {
        let cfg = InventoryConfig::from_json_str(
            r#"{"rtsp_url": "rtsp://cam/live", "rtsp_transport": "udp", "interval": 30}"#,
        )
        .unwrap();
        assert_eq!(cfg.source.url, "rtsp://cam/live");
        assert_eq!(cfg.source.rtsp_transport, RtspTransport::Udp);
        assert_eq!(cfg.interval, Duration::from_secs(30));
    }

    #[test]
    fn zones_accept_json_string_and_skip_bad_entries() {
        let cfg = InventoryConfig::from_json_str(
            r#"{"zones": "{\"ShelfA\": [0, 0, 100, 100], \"Broken\": [1, 2, 3]}"}"#,
        )
        .unwrap();
        assert_eq!(cfg.zones.len(), 1);
        assert!(cfg.zones.get("ShelfA").is_some());
    }

    #[test]
    fn detector_settings_are_sanitised() {
        let cfg = InventoryConfig::from_json_str(
            r#"{"detector": {"upscale_factors": [0.5, 2.5, 99], "warp_min_px": 600, "warp_max_px": 200, "low_score_threshold": 4}}"#,
        )
        .unwrap();
        assert_eq!(cfg.detector.upscale_factors, vec![2.5]);
        assert_eq!((cfg.detector.warp_min_px, cfg.detector.warp_max_px), (200, 600));
        assert_eq!(cfg.detector.low_score_threshold, 0.35);
    }

    #[test]
    fn unit_upscale_factor_is_kept_and_empty_list_is_allowed() {
        let cfg = InventoryConfig::from_json_str(r#"{"detector": {"upscale_factors": [1.0]}}"#).unwrap();
        assert_eq!(cfg.detector.upscale_factors, vec![1.0]);
        assert!(cfg.detector.zone_pass);
        let cfg = InventoryConfig::from_json_str(r#"{"detector": {"upscale_factors": []}}"#).unwrap();
        assert!(cfg.detector.upscale_factors.is_empty());
        assert!(cfg.detector.zone_pass);
    }

    #[test]
    fn huge_durations_are_clamped() {
        let cfg = InventoryConfig::from_json_str(
            r#"{"interval_secs": 1e30, "source": {"timeout_secs": 1e30}}"#,
        )
        .unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(86_400));
        assert_eq!(cfg.source.timeout, Duration::from_secs(300));

        let cfg = InventoryConfig::from_json_str(r#"{"source": {"timeout_secs": 2.5}}"#).unwrap();
        assert_eq!(cfg.source.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn label_length_is_capped() {
        let cfg = InventoryConfig::from_json_str(r#"{"overlay": {"max_label_chars": 1e300}}"#).unwrap();
        assert_eq!(cfg.overlay.max_label_chars, 256);
    }

    #[test]
    fn addon_option_keys_are_honoured() {
        let cfg = InventoryConfig::from_json_str(
            r#"{"interval_seconds": 15, "camera_entity": "camera.garage", "poll_interval_ms": 750}"#,
        )
        .unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(15));
        assert_eq!(cfg.source.url, "http://supervisor/core/api/camera_proxy/camera.garage");
        assert_eq!(cfg.api.mjpeg_interval, Duration::from_millis(750));

        // The explicit key wins over the add-on spelling.
        let cfg = InventoryConfig::from_json_str(r#"{"interval_secs": 20, "interval_seconds": 15}"#).unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(20));
    }

    #[test]
    fn explicit_url_wins_over_camera_entity() {
        let cfg = InventoryConfig::from_json_str(
            r#"{"source": {"url": "rtsp://cam/live", "camera_entity": "camera.garage"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.source.url, "rtsp://cam/live");
    }

    #[test]
    fn bad_api_addr_is_rejected() {
        assert!(InventoryConfig::from_json_str(r#"{"api": {"addr": "not-an-addr"}}"#).is_err());
    }

    #[test]
    fn unknown_store_kind_falls_back_to_json() {
        let cfg = InventoryConfig::from_json_str(r#"{"store": {"kind": "redis"}}"#).unwrap();
        assert_eq!(cfg.store.kind, StoreKind::Json);
        let cfg = InventoryConfig::from_json_str(r#"{"store": {"kind": "SQLite", "path": "/tmp/x.db"}}"#).unwrap();
        assert_eq!(cfg.store.kind, StoreKind::Sqlite);
    }
}
