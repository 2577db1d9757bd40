//! RTSP frame source.
//!
//! Decodes IP camera streams with GStreamer:
//! `rtspsrc ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`.
//! End-of-stream from the pipeline ends the source cleanly; a pipeline error
//! or a stalled stream is a capture failure.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::{Duration, Instant};

use super::{stall_grace, CaptureConfig, FrameSource, SourceStats};
use crate::frame::Frame;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RtspSource {
    config: CaptureConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
    ended: bool,
}

impl RtspSource {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.source
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
            ended: false,
        })
    }

    /// How long to wait on the appsink before calling the stream stalled.
    fn pull_timeout(&self) -> gstreamer::ClockTime {
        let wait = if self.last_frame_at.is_none() {
            FIRST_FRAME_TIMEOUT
        } else {
            stall_grace(self.config.target_fps)
        };
        gstreamer::ClockTime::from_mseconds(wait.as_millis() as u64)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.ended = true;
                }
                _ => {}
            }
        }
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", self.config.source);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("RTSP stream failed: {}", err));
        }
        if self.ended {
            return Ok(None);
        }

        let Some(sample) = self.appsink.try_pull_sample(self.pull_timeout()) else {
            if self.appsink.is_eos() {
                self.ended = true;
                return Ok(None);
            }
            return Err(anyhow!("RTSP stream stalled"));
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, width, height).map(Some)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.ended {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        match self.last_frame_at {
            Some(at) => at.elapsed() <= stall_grace(self.config.target_fps),
            None => connected_at.elapsed() <= FIRST_FRAME_TIMEOUT,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

/// Copy an RGB sample into a tightly packed buffer, dropping row padding.
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let (width, height) = (info.width(), info.height());
    let row_bytes = width as usize * 3;
    let stride = usize::try_from(info.stride()[0]).context("negative RTSP row stride")?;
    if stride < row_bytes {
        return Err(anyhow!("RTSP stride {} shorter than a row", stride));
    }

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in map.as_slice().chunks(stride).take(height as usize) {
        let row = row
            .get(..row_bytes)
            .context("RTSP buffer ends mid-row")?;
        pixels.extend_from_slice(row);
    }
    if pixels.len() != row_bytes * height as usize {
        return Err(anyhow!("RTSP buffer is shorter than one frame"));
    }
    Ok((pixels, width, height))
}
