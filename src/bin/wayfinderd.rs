//! wayfinderd - assistive hazard alert daemon
//!
//! This daemon:
//! 1. Ingests frames from the ESP32 camera (or a `stub://` source)
//! 2. Runs the detector on the newest frame at a fixed rate
//! 3. Scores, smooths and rate-limits hazard alerts
//! 4. Sends alert clips (or search beeps) to the ESP32 speaker over PCM1

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use wayfinder::audio::{spawn_dispatcher, AlertClips, DispatchQueue, SpeakerTransport};
use wayfinder::config::{DetectorSettings, WayfinderConfig};
use wayfinder::detect::{DetectorBackend, ReplayBackend, StubBackend};
use wayfinder::ingest::{open_source, spawn_ingest};
use wayfinder::pipeline::{spawn_pipeline, RiskCycle};
use wayfinder::{resolve_target, Shutdown, SnapshotStore};

const HEALTH_LOG_EVERY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Turn an ESP32 camera feed into spoken hazard alerts on an ESP32 speaker"
)]
struct Args {
    /// JSON or TOML config file (overrides WAYFINDER_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Replay scripted detections from a JSON file instead of the configured detector.
    #[arg(long, env = "WAYFINDER_REPLAY")]
    replay: Option<PathBuf>,

    /// Start in search mode for this item (e.g. "cup", "手机").
    #[arg(long)]
    search: Option<String>,

    /// Use synthesized tones instead of loading alert clips.
    #[arg(long)]
    tones: bool,

    /// Print the snapshot as JSON alongside each health line.
    #[arg(long)]
    print_snapshots: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(path) = &args.config {
        std::env::set_var("WAYFINDER_CONFIG", path);
    }
    let mut cfg = WayfinderConfig::load()?;
    if let Some(path) = args.replay.clone() {
        cfg.detector = DetectorSettings::Replay(path);
    }

    let store = SnapshotStore::new();
    let shutdown = Shutdown::new();

    if let Some(item) = args.search.as_deref() {
        store.start_search(resolve_target(item)?);
    }

    let detector = build_detector(&cfg.detector)?;
    log::info!("detector: {}", detector.name());

    let clips = if args.tones {
        AlertClips::synthesized()
    } else {
        AlertClips::load(&cfg.audio_dir)
    };
    let transport = SpeakerTransport::new(cfg.speaker.clone());
    let (queue, jobs) = DispatchQueue::bounded(cfg.queue_capacity)?;
    let dispatcher = spawn_dispatcher(
        jobs,
        transport.clone(),
        clips,
        Arc::clone(&store),
        shutdown.clone(),
    )?;

    let source = open_source(&cfg.camera)?;
    log::info!("camera: {}", source.describe());
    let ingest = spawn_ingest(
        source,
        Arc::clone(&store),
        cfg.ingest.clone(),
        shutdown.clone(),
    )?;

    let cycle = RiskCycle::new(
        detector,
        &cfg.pipeline,
        queue,
        transport,
        Arc::clone(&store),
    )?;
    let pipeline = spawn_pipeline(cycle, cfg.pipeline.infer_interval, shutdown.clone())?;

    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.trigger()).context("error setting Ctrl-C handler")?;

    log::info!(
        "wayfinderd running; speaker {}; waiting for shutdown signal (Ctrl-C)...",
        cfg.speaker.addr
    );
    while !shutdown.sleep(HEALTH_LOG_EVERY) {
        let stats = ingest.stats();
        let snap = store.snapshot();
        log::info!(
            "health: camera_ok={} frames={} failures={} cycles={} level={} oracle_errors={} audio_ok={:?} search={}",
            stats.is_healthy(cfg.ingest.health_grace),
            stats.frames_published,
            stats.failures_total,
            snap.generation,
            snap.alert.level.as_u8(),
            snap.oracle_errors,
            snap.audio.last_send_ok,
            snap.search.target_class.as_deref().unwrap_or("-"),
        );
        if args.print_snapshots {
            match serde_json::to_string(&snap) {
                Ok(json) => println!("{json}"),
                Err(err) => log::warn!("snapshot encode failed: {err}"),
            }
        }
    }

    log::info!("shutdown signal received, stopping...");
    ingest.join()?;
    pipeline.join()?;
    dispatcher.join()?;
    log::info!("wayfinderd stopped");
    Ok(())
}

fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings {
        DetectorSettings::Stub => {
            log::warn!("no detector configured; running the stub (no hazards will be seen)");
            Ok(Box::new(StubBackend::new()))
        }
        DetectorSettings::Replay(path) => Ok(Box::new(ReplayBackend::from_path(path)?)),
        DetectorSettings::Model { path, input_size } => model_backend(path, *input_size),
    }
}

#[cfg(feature = "backend-tract")]
fn model_backend(path: &std::path::Path, input_size: u32) -> Result<Box<dyn DetectorBackend>> {
    Ok(Box::new(wayfinder::detect::TractBackend::new(
        path, input_size,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn model_backend(path: &std::path::Path, _input_size: u32) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "model {} configured but this build lacks the backend-tract feature",
        path.display()
    ))
}
