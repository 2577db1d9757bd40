use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::DEFAULT_COOLDOWN_SECS;
use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::ingest::{
    CaptureConfig, DEFAULT_CAPTURE_FPS, DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH,
};
use crate::render::{RenderStyle, DEFAULT_CAPTION};
use crate::stream::DEFAULT_VIEWER_QUEUE_DEPTH;
use crate::tracker::{
    TrackerConfig, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_FRAME_SKIP, DEFAULT_TARGET_CLASS,
};

const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_CAMERA_SOURCE: &str = "/dev/video0";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_AUDIO_FILE: &str = "audio.mp3";
const DEFAULT_PLAYER: [&str; 2] = ["mpg123", "-q"];

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    alert: Option<AlertConfigFile>,
    render: Option<RenderConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    target_class: Option<String>,
    confidence_threshold: Option<f32>,
    frame_skip: Option<u32>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    audio_file: Option<PathBuf>,
    cooldown_secs: Option<f64>,
    player: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    caption: Option<String>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    viewer_queue_depth: Option<usize>,
}

/// Daemon configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub server: ServerSettings,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub alert: AlertSettings,
    pub render: RenderSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub model_path: PathBuf,
    pub target_class: String,
    pub confidence_threshold: f32,
    pub frame_skip: u32,
    pub input_size: u32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub audio_file: PathBuf,
    pub cooldown_secs: f64,
    /// Player command; the audio file path is appended as the last argument.
    pub player: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub caption: String,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    pub viewer_queue_depth: usize,
}

impl SentinelConfig {
    /// Load from the file named by `SENTINEL_CONFIG` (if any), then apply env
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, but with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let server = file.server.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let render = file.render.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();

        Self {
            server: ServerSettings {
                addr: server
                    .addr
                    .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
            },
            camera: CameraSettings {
                source: camera
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAPTURE_FPS),
            },
            detection: DetectionSettings {
                model_path: detection
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                target_class: detection
                    .target_class
                    .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string()),
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                frame_skip: detection.frame_skip.unwrap_or(DEFAULT_FRAME_SKIP),
                input_size: detection.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            alert: AlertSettings {
                audio_file: alert
                    .audio_file
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_FILE)),
                cooldown_secs: alert
                    .cooldown_secs
                    .unwrap_or(DEFAULT_COOLDOWN_SECS as f64),
                player: alert
                    .player
                    .unwrap_or_else(|| DEFAULT_PLAYER.iter().map(|s| s.to_string()).collect()),
            },
            render: RenderSettings {
                caption: render
                    .caption
                    .unwrap_or_else(|| DEFAULT_CAPTION.to_string()),
                font_path: render.font_path,
            },
            stream: StreamSettings {
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                viewer_queue_depth: stream
                    .viewer_queue_depth
                    .unwrap_or(DEFAULT_VIEWER_QUEUE_DEPTH),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("SENTINEL_ADDR") {
            self.server.addr = addr;
        }
        if let Some(camera) = non_empty_env("SENTINEL_CAMERA") {
            self.camera.source = camera;
        }
        if let Some(model) = non_empty_env("SENTINEL_MODEL") {
            self.detection.model_path = PathBuf::from(model);
        }
        if let Some(audio) = non_empty_env("SENTINEL_AUDIO_FILE") {
            self.alert.audio_file = PathBuf::from(audio);
        }
        if let Some(cooldown) = non_empty_env("SENTINEL_COOLDOWN_SECS") {
            self.alert.cooldown_secs = cooldown
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTINEL_COOLDOWN_SECS must be a number of seconds"))?;
        }
        if let Some(skip) = non_empty_env("SENTINEL_FRAME_SKIP") {
            self.detection.frame_skip = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTINEL_FRAME_SKIP must be a positive integer"))?;
        }
        if let Some(confidence) = non_empty_env("SENTINEL_CONFIDENCE") {
            self.detection.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("SENTINEL_CONFIDENCE must be a number in [0, 1]"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.detection.frame_skip == 0 {
            return Err(anyhow!("frame_skip must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1], got {}",
                self.detection.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            return Err(anyhow!(
                "iou_threshold must be within [0, 1], got {}",
                self.detection.iou_threshold
            ));
        }
        if self.detection.input_size == 0 {
            return Err(anyhow!("input_size must be non-zero"));
        }
        if self.detection.target_class.trim().is_empty() {
            return Err(anyhow!("target_class must not be empty"));
        }
        if !self.alert.cooldown_secs.is_finite() || self.alert.cooldown_secs < 0.0 {
            return Err(anyhow!(
                "cooldown_secs must be a non-negative number, got {}",
                self.alert.cooldown_secs
            ));
        }
        Duration::try_from_secs_f64(self.alert.cooldown_secs).map_err(|err| {
            anyhow!(
                "cooldown_secs {} is out of range: {}",
                self.alert.cooldown_secs,
                err
            )
        })?;
        if self.alert.player.is_empty() || self.alert.player[0].trim().is_empty() {
            return Err(anyhow!("alert player command must not be empty"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be between 1 and 100, got {}",
                self.stream.jpeg_quality
            ));
        }
        if self.stream.viewer_queue_depth == 0 {
            return Err(anyhow!("viewer_queue_depth must be at least 1"));
        }
        Ok(())
    }

    /// Cooldown as a `Duration`. Values `validate` would reject saturate
    /// instead of panicking.
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.alert.cooldown_secs).unwrap_or(Duration::MAX)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            source: self.camera.source.clone(),
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
        }
    }

    pub fn tracker_config(&self) -> Result<TrackerConfig> {
        TrackerConfig::new(
            self.detection.target_class.clone(),
            self.detection.confidence_threshold,
            self.detection.frame_skip,
        )
    }

    pub fn render_style(&self) -> RenderStyle {
        RenderStyle {
            caption: self.render.caption.clone(),
            ..RenderStyle::default()
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
