//! scan_image - run the tag detector over one image file
//!
//! Prints the detection report as JSON. With `--config` the configured zones
//! and detector settings are used; with `--overlay` the annotated frame is
//! written next to it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use qr_inventory::{
    detect::backend_by_name, Frame, InventoryConfig, OverlayRenderer, TagDetector, ZoneSet,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to scan (JPEG or PNG).
    image: PathBuf,
    /// Optional configuration file for zones and detector settings.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the annotated overlay to this path.
    #[arg(long)]
    overlay: Option<PathBuf>,
    /// Skip the zone-scoped pass.
    #[arg(long)]
    no_zone_pass: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let (mut settings, zones, overlay, backend) = match args.config.as_deref() {
        Some(path) => {
            let cfg = InventoryConfig::load(Some(path))?;
            (cfg.detector, cfg.zones, cfg.overlay, cfg.backend)
        }
        None => {
            let cfg = InventoryConfig::default();
            (cfg.detector, ZoneSet::default(), cfg.overlay, cfg.backend)
        }
    };
    if args.no_zone_pass {
        settings.zone_pass = false;
    }

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("read image {}", args.image.display()))?;
    let frame = Frame::from_encoded(&bytes)
        .with_context(|| format!("decode image {}", args.image.display()))?;

    let mut detector = TagDetector::new(settings, backend_by_name(&backend)?);
    let report = detector.detect(&frame, &zones);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(out) = args.overlay {
        let annotated = OverlayRenderer::new(overlay).render(&frame, &report.detections, &zones);
        annotated
            .save(&out)
            .with_context(|| format!("write overlay {}", out.display()))?;
        eprintln!("overlay written to {}", out.display());
    }
    Ok(())
}
