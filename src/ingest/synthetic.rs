//! Synthetic frame source.
//!
//! `stub://name` produces an endless moving test pattern; `stub://name?frames=N`
//! ends the stream after `N` frames. With a non-zero `target_fps` frames are
//! paced to that rate.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::{CaptureConfig, FrameSource, SourceStats};
use crate::frame::Frame;

pub struct SyntheticSource {
    config: CaptureConfig,
    frame_limit: Option<u64>,
    frame_count: u64,
    next_due: Option<Instant>,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        let frame_limit = parse_frame_limit(&config.source)?;
        Ok(Self {
            config,
            frame_limit,
            frame_count: 0,
            next_due: None,
            connected: false,
        })
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(self.next_due.map_or(now, |due| due.max(now)) + interval);
    }

    /// Diagonal gradient that drifts one pixel per frame.
    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as u64;
        let height = self.config.height as u64;
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let base = x + y + self.frame_count;
                pixels.push((base % 256) as u8);
                pixels.push(((base / 2) % 256) as u8);
                pixels.push(((y * 255) / height.max(1)) as u8);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.config.source);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected"));
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.pace();
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        Frame::new(pixels, self.config.width, self.config.height).map(Some)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.source.clone(),
        }
    }
}

fn parse_frame_limit(source: &str) -> Result<Option<u64>> {
    let Some((_, query)) = source.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(("frames", value)) = pair.split_once('=') {
            let limit = value
                .parse::<u64>()
                .map_err(|_| anyhow!("invalid frames={} in {}", value, source))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(source: &str) -> CaptureConfig {
        CaptureConfig {
            source: source.to_string(),
            width: 16,
            height: 8,
            target_fps: 0,
        }
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config("stub://test"))?;
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 8);
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn frames_change_over_time() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config("stub://test"))?;
        source.connect()?;

        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config("stub://test?frames=3"))?;
        source.connect()?;

        for _ in 0..3 {
            assert!(source.next_frame()?.is_some());
        }
        assert!(source.next_frame()?.is_none());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn unconnected_source_fails() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config("stub://test"))?;
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn bad_frame_limit_is_rejected() {
        assert!(SyntheticSource::new(stub_config("stub://test?frames=many")).is_err());
    }
}
