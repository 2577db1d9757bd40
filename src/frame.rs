//! Captured frame container.
//!
//! - `Frame`: immutable RGB24 pixel grid produced by a capture source.
//! - `BoundingBox`: integer pixel rectangle in the coordinate space of the frame
//!   it was computed on.
//!
//! A `Frame` is owned by the processing loop for exactly one iteration. It has no
//! `Clone` and no mutable pixel accessor; annotation always works on a copy
//! obtained through `Frame::to_rgb_image`.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;

/// Bytes per pixel for RGB24 frames.
pub const RGB_CHANNELS: usize = 3;

/// Immutable RGB24 frame.
pub struct Frame {
    /// Row-major RGB24 pixels, `width * height * 3` bytes.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture instant.
    captured_at: Instant,
}

// No Clone: a frame passes from the source into the loop and dies after encoding.

impl Frame {
    /// Wrap RGB24 pixels captured now.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::captured_at(data, width, height, Instant::now())
    }

    /// Wrap RGB24 pixels with an explicit capture instant.
    pub fn captured_at(data: Vec<u8>, width: u32, height: u32, at: Instant) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: at,
        })
    }

    /// Solid-colour frame. Handy for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Self::new(data, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn captured_instant(&self) -> Instant {
        self.captured_at
    }

    /// Pixel at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Owned copy of the pixels as an `image` buffer. The frame itself is untouched.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length was validated in the constructor, so the buffer always fits.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// BoundingBox
// ----------------------------------------------------------------------------

/// Axis-aligned box in pixel coordinates, `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    /// Build a box, rejecting degenerate or inverted corners.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        if x1 >= x2 || y1 >= y2 {
            return Err(anyhow!(
                "invalid bounding box ({}, {}, {}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Truncate float corners to pixels, the way detector outputs are consumed.
    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
    }

    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }
}
