//! YOLOv8 output decoding.
//!
//! The detection head emits a `[1, 4 + classes, proposals]` tensor laid out
//! channel-major: rows 0..4 hold `cx, cy, w, h` in model-input pixels, the
//! remaining rows hold one score per class.

use anyhow::{anyhow, Result};

use super::labels;
use super::result::Detection;
use crate::frame::BoundingBox;

/// Candidate box in frame pixels before integer truncation.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class: usize,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }
}

/// Geometry and thresholds for one decode pass.
#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    /// Square model input side, in pixels.
    pub input_size: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

/// Decode a channel-major YOLOv8 head into frame-space detections.
///
/// Each proposal keeps only its best-scoring class. Survivors go through
/// class-wise non-max suppression and come back sorted by confidence.
pub fn decode(data: &[f32], shape: &[usize], params: &DecodeParams) -> Result<Vec<Detection>> {
    let (rows, proposals) = match shape {
        [1, rows, proposals] => (*rows, *proposals),
        [rows, proposals] => (*rows, *proposals),
        other => return Err(anyhow!("unexpected YOLOv8 output shape {:?}", other)),
    };
    if rows <= 4 {
        return Err(anyhow!("YOLOv8 output has no class rows ({} rows)", rows));
    }
    if data.len() != rows * proposals {
        return Err(anyhow!(
            "YOLOv8 output length mismatch: expected {}, got {}",
            rows * proposals,
            data.len()
        ));
    }
    let classes = rows - 4;
    let scale_x = params.frame_width as f32 / params.input_size as f32;
    let scale_y = params.frame_height as f32 / params.input_size as f32;
    let max_x = params.frame_width as f32;
    let max_y = params.frame_height as f32;

    let at = |row: usize, i: usize| data[row * proposals + i];

    let mut candidates = Vec::new();
    for i in 0..proposals {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..classes {
            let score = at(4 + class, i);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        candidates.push(Candidate {
            x1: ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
            y1: ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
            x2: ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
            y2: ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
            score: best_score,
            class: best_class,
        });
    }

    let kept = non_max_suppression(candidates, params.iou_threshold);
    Ok(kept
        .into_iter()
        .filter_map(|c| {
            let label = labels::class_name(c.class)?;
            // Boxes that collapse under truncation carry nothing drawable.
            let bbox = BoundingBox::from_xyxy(c.x1, c.y1, c.x2, c.y2).ok()?;
            Some(Detection::new(label, c.score, bbox))
        })
        .collect())
}

fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class == candidate.class && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSES: usize = 80;

    fn params() -> DecodeParams {
        DecodeParams {
            input_size: 640,
            frame_width: 1280,
            frame_height: 640,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
        }
    }

    /// Build a channel-major head from `(cx, cy, w, h, class, score)` proposals.
    fn head(proposals: &[(f32, f32, f32, f32, usize, f32)]) -> (Vec<f32>, Vec<usize>) {
        let n = proposals.len();
        let rows = 4 + CLASSES;
        let mut data = vec![0.0f32; rows * n];
        for (i, &(cx, cy, w, h, class, score)) in proposals.iter().enumerate() {
            data[i] = cx;
            data[n + i] = cy;
            data[2 * n + i] = w;
            data[3 * n + i] = h;
            data[(4 + class) * n + i] = score;
        }
        (data, vec![1, rows, n])
    }

    #[test]
    fn decodes_and_scales_to_frame_pixels() -> Result<()> {
        let (data, shape) = head(&[(100.0, 100.0, 40.0, 20.0, 67, 0.9)]);
        let detections = decode(&data, &shape, &params())?;

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_label, "cell phone");
        assert_eq!(detections[0].bbox, BoundingBox::new(160, 90, 240, 110)?);
        Ok(())
    }

    #[test]
    fn drops_low_scores() -> Result<()> {
        let (data, shape) = head(&[(100.0, 100.0, 40.0, 20.0, 67, 0.3)]);
        assert!(decode(&data, &shape, &params())?.is_empty());
        Ok(())
    }

    #[test]
    fn suppresses_overlapping_boxes_of_same_class() -> Result<()> {
        let (data, shape) = head(&[
            (100.0, 100.0, 40.0, 40.0, 67, 0.7),
            (102.0, 101.0, 40.0, 40.0, 67, 0.95),
            (102.0, 101.0, 40.0, 40.0, 0, 0.8),
        ]);
        let detections = decode(&data, &shape, &params())?;

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_label, "cell phone");
        assert!((detections[0].confidence - 0.95).abs() < 1e-6);
        assert_eq!(detections[1].class_label, "person");
        Ok(())
    }

    #[test]
    fn rejects_malformed_shapes() {
        assert!(decode(&[0.0; 8], &[1, 4, 2], &params()).is_err());
        assert!(decode(&[0.0; 10], &[1, 84, 2], &params()).is_err());
        assert!(decode(&[0.0; 10], &[2, 84, 1, 1], &params()).is_err());
    }
}
