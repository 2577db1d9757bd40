//! sentineld - phone sentinel daemon
//!
//! This daemon:
//! 1. Captures frames from the configured camera (V4L2, RTSP or stub://)
//! 2. Runs the phone detector every Nth frame
//! 3. Plays the alert clip, at most once per cooldown window
//! 4. Serves the annotated feed at /video_feed and a landing page at /

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use phone_sentinel::{
    open_source, AlertScheduler, AnnotationRenderer, CommandAudioSink, DetectionStateTracker,
    DetectorBackend, FrameBroadcaster, JpegFrameEncoder, Pipeline, SentinelConfig, ServerConfig,
    StreamServer, StubBackend,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch a camera for phones, sound an alert and stream the annotated feed"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for the web server (overrides config and env).
    #[arg(long)]
    addr: Option<String>,

    /// Camera: device path, device index, rtsp:// URL or stub://name.
    #[arg(long)]
    camera: Option<String>,

    /// Use the built-in no-op detector instead of loading a model.
    #[arg(long)]
    stub_detector: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.server.addr = addr;
    }
    if let Some(camera) = args.camera {
        cfg.camera.source = camera;
    }
    cfg.validate()?;

    let broadcaster = FrameBroadcaster::new(cfg.stream.viewer_queue_depth);
    let server = StreamServer::new(
        ServerConfig {
            addr: cfg.server.addr.clone(),
        },
        broadcaster.clone(),
    )
    .spawn()?;
    log::info!("video feed at http://{}/video_feed", server.addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut detector = build_detector(&cfg, args.stub_detector)?;
    detector.warm_up()?;

    let mut renderer = AnnotationRenderer::new(cfg.render_style());
    if let Some(font_path) = &cfg.render.font_path {
        renderer = renderer.with_font_file(font_path)?;
    }
    if !renderer.has_font() {
        bail!("no caption font available");
    }

    let mut pipeline = Pipeline::new(
        open_source(&cfg.capture_config())?,
        detector,
        DetectionStateTracker::new(cfg.tracker_config()?),
        AlertScheduler::new(cfg.cooldown()),
    )
    .with_audio_sink(Box::new(CommandAudioSink::new(
        cfg.alert.player.clone(),
        &cfg.alert.audio_file,
    )?))
    .with_renderer(renderer)
    .with_encoder(Box::new(JpegFrameEncoder::new(cfg.stream.jpeg_quality)?))
    .with_shutdown(shutdown);

    log::info!(
        "sentineld running. camera={} {}x{} skip={} confidence={} cooldown={}s",
        cfg.camera.source,
        cfg.camera.width,
        cfg.camera.height,
        cfg.detection.frame_skip,
        cfg.detection.confidence_threshold,
        cfg.alert.cooldown_secs
    );

    let mut last_health_log = Instant::now();
    while let Some(report) = pipeline.step() {
        if let Some(part) = report.part {
            broadcaster.publish(part);
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = pipeline.stats();
            let source = pipeline.source_stats();
            let stream = broadcaster.stats();
            log::info!(
                "health source={} healthy={} frames={} inferences={} failures={} alerts={} viewers={} dropped={}",
                source.source,
                pipeline.source_healthy(),
                stats.frames_captured,
                stats.inference_runs,
                stats.inference_failures,
                stats.alerts_fired,
                stream.viewers,
                stream.dropped
            );
            last_health_log = Instant::now();
        }
    }

    broadcaster.close();
    server.stop()?;

    match pipeline.stop_cause() {
        Some(cause) if cause.is_failure() => Err(anyhow!("sentineld stopped: {}", cause)),
        Some(cause) => {
            log::info!("sentineld stopped: {}", cause);
            Ok(())
        }
        None => Ok(()),
    }
}

fn build_detector(cfg: &SentinelConfig, use_stub: bool) -> Result<Box<dyn DetectorBackend>> {
    if use_stub {
        log::info!("using stub detector; no alerts will fire");
        return Ok(Box::new(StubBackend::new()));
    }

    #[cfg(feature = "backend-tract")]
    {
        let settings = phone_sentinel::YoloSettings {
            input_size: cfg.detection.input_size,
            confidence_threshold: cfg.detection.confidence_threshold,
            iou_threshold: cfg.detection.iou_threshold,
        };
        let backend = phone_sentinel::TractYoloBackend::new(&cfg.detection.model_path, settings)?;
        log::info!(
            "loaded detector model {}",
            cfg.detection.model_path.display()
        );
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        log::warn!(
            "built without backend-tract; ignoring model {} and using stub detector",
            cfg.detection.model_path.display()
        );
        Ok(Box::new(StubBackend::new()))
    }
}
