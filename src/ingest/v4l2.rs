//! V4L2 frame source.
//!
//! Captures from a local device node (e.g. /dev/video0). Formats are tried
//! in order RGB3, YUYV, MJPG; whichever the driver accepts is converted to
//! RGB24 per frame.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::{normalize_to_rgb, stall_grace, CaptureConfig, FrameSource, PixelFormat, SourceStats};
use crate::frame::Frame;

const FORMAT_PREFERENCE: [&[u8; 4]; 3] = [b"RGB3", b"YUYV", b"MJPG"];

pub struct V4l2Source {
    config: CaptureConfig,
    state: Option<V4l2State>,
    pixel_format: PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        Ok(Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            pixel_format: PixelFormat::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    /// Ask for each preferred fourcc in turn and keep the first the driver
    /// actually grants.
    fn negotiate_format(&self, device: &mut v4l::Device) -> Result<(v4l::Format, PixelFormat)> {
        use v4l::video::Capture;

        for fourcc in FORMAT_PREFERENCE {
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(fourcc);

            match device.set_format(&format) {
                Ok(granted) => {
                    if let Some(pixel_format) = PixelFormat::from_fourcc(&granted.fourcc.repr) {
                        return Ok((granted, pixel_format));
                    }
                    log::debug!(
                        "V4l2Source: {} answered {} with {}",
                        self.config.source,
                        format.fourcc,
                        granted.fourcc
                    );
                }
                Err(err) => {
                    log::warn!(
                        "V4l2Source: failed to set {} on {}: {}",
                        format.fourcc,
                        self.config.source,
                        err
                    );
                }
            }
        }
        Err(anyhow!(
            "{} supports none of RGB3, YUYV, MJPG",
            self.config.source
        ))
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.source)
            .with_context(|| format!("open v4l2 device {}", self.config.source))?;
        let (format, pixel_format) = self.negotiate_format(&mut device)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.source,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.pixel_format = pixel_format;
        self.last_error = None;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.config.source,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let rgb = normalize_to_rgb(
            &buf,
            self.active_width,
            self.active_height,
            self.pixel_format,
        )
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(rgb, self.active_width, self.active_height).map(Some)
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
            && self
                .last_frame_at
                .map_or(true, |at| at.elapsed() <= stall_grace(self.config.target_fps))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_fails_to_connect() -> Result<()> {
        let mut source = V4l2Source::new(CaptureConfig {
            source: "/dev/video-does-not-exist".to_string(),
            ..CaptureConfig::default()
        })?;
        assert!(source.connect().is_err());
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn unconnected_source_reports_healthy_until_first_error() -> Result<()> {
        let source = V4l2Source::new(CaptureConfig::default())?;
        assert!(source.is_healthy());
        assert_eq!(source.stats().frames_captured, 0);
        Ok(())
    }
}
