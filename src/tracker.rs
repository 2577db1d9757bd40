//! Frame-cadence detection state.
//!
//! `DetectionStateTracker` runs the detector only on every Nth frame and keeps
//! the last inference result on display for the frames in between. State is
//! overwritten wholesale by each completed inference and never merged.

use anyhow::{anyhow, Context, Result};
use std::num::NonZeroU32;

use crate::detect::{Detection, DetectorBackend};
use crate::frame::{BoundingBox, Frame};

pub const DEFAULT_TARGET_CLASS: &str = "cell phone";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_FRAME_SKIP: u32 = 3;

/// Tracker's current belief about the scene.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionState {
    pub target_present: bool,
    /// Boxes of qualifying detections, in detector order.
    pub boxes: Vec<BoundingBox>,
}

impl DetectionState {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub target_class: String,
    pub confidence_threshold: f32,
    /// Stride between inference frames. `1` runs inference on every frame.
    pub skip_interval: NonZeroU32,
}

impl TrackerConfig {
    pub fn new(
        target_class: impl Into<String>,
        confidence_threshold: f32,
        skip_interval: u32,
    ) -> Result<Self> {
        let skip_interval =
            NonZeroU32::new(skip_interval).ok_or_else(|| anyhow!("frame skip must be >= 1"))?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                confidence_threshold
            ));
        }
        Ok(Self {
            target_class: target_class.into(),
            confidence_threshold,
            skip_interval,
        })
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            target_class: DEFAULT_TARGET_CLASS.to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            skip_interval: NonZeroU32::new(DEFAULT_FRAME_SKIP).unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// What the tracker did with one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerStep {
    /// Not an inference frame; state carried over.
    Skipped,
    /// Inference ran and replaced the state.
    Inferred,
}

/// Holds the detection state between inference frames.
///
/// The processing loop is the only writer, so no interior locking is needed.
#[derive(Debug)]
pub struct DetectionStateTracker {
    config: TrackerConfig,
    state: DetectionState,
}

impl DetectionStateTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: DetectionState::empty(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// True iff `frame_index` is a multiple of the skip interval.
    pub fn should_infer(&self, frame_index: u64) -> bool {
        should_infer_this_frame(frame_index, self.config.skip_interval)
    }

    /// Replace the state from one inference result.
    ///
    /// Qualifying means `class_label == target_class` and
    /// `confidence >= confidence_threshold`. Zero qualifying detections clear
    /// the state.
    pub fn update_from_inference(&mut self, detections: &[Detection]) {
        let boxes: Vec<BoundingBox> = detections
            .iter()
            .filter(|d| d.qualifies(&self.config.target_class, self.config.confidence_threshold))
            .map(|d| d.bbox)
            .collect();
        self.state = DetectionState {
            target_present: !boxes.is_empty(),
            boxes,
        };
    }

    pub fn current_state(&self) -> &DetectionState {
        &self.state
    }

    /// Run one frame through the tracker, calling the detector when due.
    ///
    /// A detector error leaves the state exactly as it was and is returned to
    /// the caller, which should log it and continue with the next frame.
    pub fn observe(
        &mut self,
        frame_index: u64,
        frame: &Frame,
        detector: &mut dyn DetectorBackend,
    ) -> Result<TrackerStep> {
        if !self.should_infer(frame_index) {
            return Ok(TrackerStep::Skipped);
        }
        let detections = detector
            .detect(frame)
            .with_context(|| format!("{} inference failed on frame {}", detector.name(), frame_index))?;
        self.update_from_inference(&detections);
        Ok(TrackerStep::Inferred)
    }
}

/// `frame_index mod skip_interval == 0`.
pub fn should_infer_this_frame(frame_index: u64, skip_interval: NonZeroU32) -> bool {
    frame_index % u64::from(skip_interval.get()) == 0
}
