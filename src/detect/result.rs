use crate::frame::BoundingBox;

/// One object reported by a detector backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Class name, e.g. `"cell phone"`.
    pub class_label: String,
    /// Score in `[0, 1]`.
    pub confidence: f32,
    /// Box in the pixel space of the frame the detection was computed on.
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            bbox,
        }
    }

    /// True when this detection is of `class_label` with at least `threshold` confidence.
    pub fn qualifies(&self, class_label: &str, threshold: f32) -> bool {
        self.class_label == class_label && self.confidence >= threshold
    }
}
