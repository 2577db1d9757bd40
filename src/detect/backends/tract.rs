#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::detect::yolo::{self, DecodeParams};
use crate::frame::Frame;

/// Tunables for the YOLOv8 backend.
#[derive(Clone, Copy, Debug)]
pub struct YoloSettings {
    /// Square model input side (640 for the stock exports).
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for YoloSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
        }
    }
}

/// Tract-based YOLOv8 backend for ONNX exports.
///
/// Loads a local model file once and runs it on resized RGB frames. Boxes are
/// scaled back to the pixel space of the frame passed to `detect`.
pub struct TractYoloBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    settings: YoloSettings,
}

impl TractYoloBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, settings: YoloSettings) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, settings })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.settings.input_size;
        let resized = imageops::resize(&frame.to_rgb_image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractYoloBackend {
    fn name(&self) -> &'static str {
        "tract-yolov8"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();

        yolo::decode(
            &data,
            &shape,
            &DecodeParams {
                input_size: self.settings.input_size,
                frame_width: frame.width,
                frame_height: frame.height,
                confidence_threshold: self.settings.confidence_threshold,
                iou_threshold: self.settings.iou_threshold,
            },
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.settings.input_size;
        let blank = Frame::filled(side, side, [114, 114, 114])?;
        self.detect(&blank).map(|_| ())
    }
}
