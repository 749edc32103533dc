//! robot_mediad - robot media pipeline daemon
//!
//! This daemon:
//! 1. Loads pipeline configuration (ROBOT_MEDIA_CONFIG + ROBOT_MEDIA_* overrides + flags)
//! 2. Opens the media stream, brings up camera and audio, warms up the detector
//! 3. Runs the capture and detection workers until Ctrl+C or `--seconds` elapses
//! 4. Logs detections and periodic diagnostics, then stops the pipeline

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use robot_media::{
    BackpressurePolicy, DetectionStatus, MediaDevices, PipelineConfig, PipelineController,
};

const DIAGNOSTICS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Run for this many seconds, then stop (default: until Ctrl+C).
    #[arg(long)]
    seconds: Option<u64>,
    /// Camera frame rate override.
    #[arg(long)]
    fps: Option<u32>,
    /// Frame buffer capacity override.
    #[arg(long)]
    capacity: Option<usize>,
    /// Backpressure policy override (drop_oldest | block_producer).
    #[arg(long)]
    policy: Option<BackpressurePolicy>,
    /// Detector backend override (stub | cpu).
    #[arg(long, env = "ROBOT_MEDIA_BACKEND")]
    backend: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = PipelineConfig::load()?;
    if let Some(fps) = args.fps {
        cfg.camera.target_fps = fps;
    }
    if let Some(capacity) = args.capacity {
        cfg.buffer.capacity = capacity;
    }
    if let Some(policy) = args.policy {
        cfg.buffer.policy = policy;
    }
    if let Some(backend) = args.backend {
        cfg.detection.backend = backend;
    }
    cfg.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install Ctrl+C handler: {}", e))?;
    }

    let devices = MediaDevices::from_config(&cfg)?;
    let mut controller = PipelineController::new(cfg.clone(), devices)?;
    controller.start()?;
    log::info!(
        "robot_mediad running: camera={} backend={} version={}",
        cfg.camera.url,
        cfg.detection.backend,
        env!("CARGO_PKG_VERSION")
    );

    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_diagnostics = Instant::now();
    let mut detections_total = 0u64;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown requested");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        if let Err(err) = controller.check() {
            log::error!("pipeline fault: {}", err);
            break;
        }

        match controller.results().recv_timeout(cfg.idle_poll_interval) {
            Ok(result) => match &result.status {
                DetectionStatus::Success if !result.detections.is_empty() => {
                    detections_total += result.detections.len() as u64;
                    for det in &result.detections {
                        log::info!(
                            "frame #{}: {} conf={:.2} box=({:.2},{:.2},{:.2},{:.2})",
                            result.seq,
                            det.label(),
                            det.confidence,
                            det.bbox.x,
                            det.bbox.y,
                            det.bbox.w,
                            det.bbox.h
                        );
                    }
                }
                DetectionStatus::Failed(reason) => {
                    log::warn!("frame #{} failed: {}", result.seq, reason);
                }
                _ => {}
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("detection worker exited");
                break;
            }
        }

        if last_diagnostics.elapsed() >= DIAGNOSTICS_INTERVAL {
            log::info!(
                "diagnostics: {}",
                serde_json::to_string(&controller.diagnostics())?
            );
            last_diagnostics = Instant::now();
        }
    }

    let report = controller.stop()?;
    log::info!(
        "stopped: detections={} report={}",
        detections_total,
        serde_json::to_string(&report)?
    );
    Ok(())
}
