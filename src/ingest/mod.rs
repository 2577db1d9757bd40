//! Frame capture sources.
//!
//! This module provides the sources the processing loop pulls frames from:
//! - Synthetic source (`stub://name[?frames=N]`) for tests and demos
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - RTSP streams via GStreamer (feature: rtsp-gstreamer)
//!
//! Every source yields RGB24 `Frame`s at the resolution it negotiated.
//! `next_frame` returns `Ok(None)` for a clean end-of-stream and `Err` for a
//! capture failure. Either one ends the processing loop; there is no reconnect.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::frame::Frame;

mod normalize;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use normalize::{normalize_to_rgb, PixelFormat};
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const DEFAULT_CAPTURE_WIDTH: u32 = 1024;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 768;
pub const DEFAULT_CAPTURE_FPS: u32 = 30;

/// Where and how to capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// `stub://...`, `rtsp://...`, a device node such as `/dev/video0`, or a
    /// bare device index such as `0`.
    pub source: String,
    /// Requested frame width. Devices may negotiate a different size.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Requested frame rate. `0` leaves the device default / does not pace.
    pub target_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: "/dev/video0".to_string(),
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            target_fps: DEFAULT_CAPTURE_FPS,
        }
    }
}

/// Statistics for a capture source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A sequential supplier of frames.
pub trait FrameSource: Send {
    /// Connect to the device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. `Ok(None)` marks end-of-stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Pick a source implementation from the configured location.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    if config.width == 0 || config.height == 0 {
        bail!("capture resolution must be non-zero");
    }
    if config.source.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())?));
    }
    if config.source.starts_with("rtsp://") || config.source.starts_with("rtsps://") {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            return Ok(Box::new(RtspSource::new(config.clone())?));
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            bail!("RTSP capture requires the rtsp-gstreamer feature");
        }
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        let mut device = config.clone();
        device.source = device_path(&config.source);
        Ok(Box::new(V4l2Source::new(device)?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        bail!(
            "camera capture from {} requires the ingest-v4l2 feature",
            config.source
        )
    }
}

/// How long a live source may go without a frame before it reports unhealthy:
/// six frame intervals, never less than two seconds.
#[cfg_attr(
    not(any(feature = "ingest-v4l2", feature = "rtsp-gstreamer")),
    allow(dead_code)
)]
pub(crate) fn stall_grace(target_fps: u32) -> Duration {
    let interval_ms = 1000u64.checked_div(u64::from(target_fps)).unwrap_or(0);
    Duration::from_millis((interval_ms * 6).max(2_000))
}

/// `"0"` becomes `/dev/video0`; anything else is taken as a path.
pub fn device_path(source: &str) -> String {
    match source.trim().parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => source.trim().to_string(),
    }
}
