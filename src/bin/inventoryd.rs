//! inventoryd - QR tag inventory daemon
//!
//! This daemon:
//! 1. Loads the validated configuration (file + environment)
//! 2. Opens the durable inventory store and the frame source
//! 3. Serves the latest snapshot over HTTP on its own thread
//! 4. Runs the periodic detect/confirm/persist/publish cycle until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use qr_inventory::{
    api::ApiServer,
    config::CONFIG_ENV,
    detect::backend_by_name,
    ingest::{open_source, redact},
    storage::open_backend,
    worker::WorkerParts,
    ConsistencyTracker, InventoryConfig, InventoryStore, OverlayRenderer, StateServer,
    StopSignal, TagDetector, Worker,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = InventoryConfig::load(args.config.as_deref())?;
    log::info!(
        "inventoryd {} starting: source={} interval={}s required_consistency={} zones={} store={:?}:{} api={}",
        env!("CARGO_PKG_VERSION"),
        redact(&cfg.source.url),
        cfg.interval.as_secs(),
        cfg.required_consistency,
        cfg.zones.len(),
        cfg.store.kind,
        cfg.store.path.display(),
        cfg.api.addr
    );
    for zone in cfg.zones.iter() {
        log::info!(
            "zone {} = ({}, {}) - ({}, {})",
            zone.name,
            zone.x1,
            zone.y1,
            zone.x2,
            zone.y2
        );
    }

    let backend = open_backend(cfg.store.kind, &cfg.store.path)
        .with_context(|| format!("open inventory store {}", cfg.store.path.display()))?;
    let inventory = InventoryStore::open(backend)?;
    let source = open_source(&cfg.source)?;
    let detector = TagDetector::new(cfg.detector.clone(), backend_by_name(&cfg.backend)?);
    log::info!(
        "detector backend={} variants={}",
        detector.backend_name(),
        detector
            .variants()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    );

    let state = Arc::new(StateServer::new());
    let api_handle = ApiServer::new(cfg.api.clone(), state.clone()).spawn()?;

    let mut worker = Worker::new(WorkerParts {
        source,
        detector,
        zones: cfg.zones.clone(),
        tracker: ConsistencyTracker::new(cfg.required_consistency),
        inventory,
        overlay: OverlayRenderer::new(cfg.overlay.clone()),
        state,
        jpeg_quality: cfg.jpeg_quality,
        interval: cfg.interval,
    });

    if args.once {
        let outcome = worker.run_cycle();
        log::info!("single cycle finished: {:?}", outcome);
    } else {
        let stop = StopSignal::new();
        let handler_stop = stop.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received, finishing current cycle...");
            handler_stop.stop();
        })
        .context("install Ctrl-C handler")?;

        log::info!("inventoryd running. Ctrl-C to stop");
        worker.run(&stop);
    }

    log::info!(
        "stopping api server; {} confirmed mapping(s) on record",
        worker.inventory().len()
    );
    api_handle.stop()?;
    Ok(())
}
