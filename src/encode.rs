//! Frame compression for transport.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Compresses an annotated frame into a transportable buffer.
pub trait FrameEncoder: Send {
    /// MIME type of the produced buffers.
    fn content_type(&self) -> &'static str;

    fn encode(&mut self, image: &RgbImage) -> Result<Vec<u8>>;
}

/// Baseline JPEG encoder.
#[derive(Clone, Debug)]
pub struct JpegFrameEncoder {
    quality: u8,
    /// Last output size, used to pre-size the next buffer.
    last_len: usize,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(anyhow!(
                "jpeg quality must be between 1 and 100, got {}",
                quality
            ));
        }
        Ok(Self {
            quality,
            last_len: 64 * 1024,
        })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
            last_len: 64 * 1024,
        }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }

    fn encode(&mut self, image: &RgbImage) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.last_len);
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )
            .context("jpeg encode failed")?;
        self.last_len = out.len();
        Ok(out)
    }
}
