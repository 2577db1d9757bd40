//! Annotation of outgoing frames.
//!
//! `AnnotationRenderer` draws the tracker's boxes and a static caption onto a
//! copy of the captured frame. The caption never carries labels or scores.
//! Caption text uses the bundled DejaVu Sans Mono Bold unless another font
//! file is configured.

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

use crate::frame::{BoundingBox, Frame};
use crate::tracker::DetectionState;

pub const DEFAULT_CAPTION: &str = "PUT THE PHONE DOWN!";

static BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSansMono-Bold.ttf");

fn bundled_font() -> Option<FontArc> {
    match FontArc::try_from_slice(BUNDLED_FONT) {
        Ok(font) => Some(font),
        Err(err) => {
            log::error!("bundled caption font is unreadable: {}", err);
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct RenderStyle {
    pub caption: String,
    /// Box outline and caption band colour (RGB).
    pub color: [u8; 3],
    pub text_color: [u8; 3],
    /// Outline thickness in pixels, growing inward from the box edge.
    pub thickness: u32,
    /// Height of the caption band.
    pub caption_height: u32,
    /// Vertical gap between caption band and box top.
    pub caption_gap: u32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            caption: DEFAULT_CAPTION.to_string(),
            color: [255, 0, 0],
            text_color: [255, 255, 255],
            thickness: 3,
            caption_height: 22,
            caption_gap: 10,
        }
    }
}

pub struct AnnotationRenderer {
    style: RenderStyle,
    font: Option<FontArc>,
}

impl AnnotationRenderer {
    /// Renderer using the bundled caption font.
    pub fn new(style: RenderStyle) -> Self {
        Self {
            style,
            font: bundled_font(),
        }
    }

    /// Load a TrueType/OpenType font for caption text.
    pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read caption font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|_| anyhow!("invalid caption font {}", path.display()))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// False only if no font could be loaded, in which case captions are
    /// drawn as a blank band.
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `state` onto a copy of `frame`. The captured frame is not modified.
    pub fn render(&self, frame: &Frame, state: &DetectionState) -> RgbImage {
        let mut canvas = frame.to_rgb_image();
        for bbox in &state.boxes {
            let Some(bbox) = self.clip_to_canvas(bbox, canvas.width(), canvas.height()) else {
                continue;
            };
            self.draw_box(&mut canvas, &bbox);
            self.draw_caption(&mut canvas, &bbox);
        }
        canvas
    }

    /// Pull box edges in to just past the canvas border. Edges that were
    /// off-canvas stay off-canvas, so the visible outline is unchanged.
    /// `None` when the box lies entirely outside the canvas.
    fn clip_to_canvas(&self, bbox: &BoundingBox, width: u32, height: u32) -> Option<BoundingBox> {
        let (w, h) = (i32::try_from(width).ok()?, i32::try_from(height).ok()?);
        if bbox.x2 < 0 || bbox.y2 < 0 || bbox.x1 >= w || bbox.y1 >= h {
            return None;
        }
        let margin = self.style.thickness.min(1024) as i32 + 1;
        BoundingBox::new(
            bbox.x1.max(-margin),
            bbox.y1.max(-margin),
            bbox.x2.min(w - 1 + margin),
            bbox.y2.min(h - 1 + margin),
        )
        .ok()
    }

    /// Outline covering pixels `x1..=x2`, `y1..=y2`.
    fn draw_box(&self, canvas: &mut RgbImage, bbox: &BoundingBox) {
        let color = Rgb(self.style.color);
        let outer_w = bbox.width() + 1;
        let outer_h = bbox.height() + 1;
        for inset in 0..self.style.thickness {
            let shrink = inset * 2;
            if shrink >= outer_w || shrink >= outer_h {
                break;
            }
            let rect = Rect::at(bbox.x1 + inset as i32, bbox.y1 + inset as i32)
                .of_size(outer_w - shrink, outer_h - shrink);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    fn caption_width(&self, bbox: &BoundingBox) -> u32 {
        match &self.font {
            Some(font) => {
                let (w, _) = text_size(self.caption_scale(), font, &self.style.caption);
                w + 8
            }
            None => bbox.width().saturating_add(1),
        }
    }

    fn caption_scale(&self) -> PxScale {
        PxScale::from(self.style.caption_height as f32 * 0.85)
    }

    /// Caption band for `bbox`: above the top-left corner, clamped to row 0.
    pub fn caption_rect(&self, bbox: &BoundingBox) -> Option<Rect> {
        let height = self.style.caption_height;
        let width = self.caption_width(bbox);
        if height == 0 || width == 0 {
            return None;
        }
        let lift = i32::try_from(self.style.caption_gap.saturating_add(height)).unwrap_or(i32::MAX);
        let top = bbox.y1.saturating_sub(lift).max(0);
        Some(Rect::at(bbox.x1, top).of_size(width, height))
    }

    fn draw_caption(&self, canvas: &mut RgbImage, bbox: &BoundingBox) {
        let Some(rect) = self.caption_rect(bbox) else {
            return;
        };
        draw_filled_rect_mut(canvas, rect, Rgb(self.style.color));
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                Rgb(self.style.text_color),
                rect.left() + 4,
                rect.top() + 1,
                self.caption_scale(),
                font,
                &self.style.caption,
            );
        }
    }
}

impl Default for AnnotationRenderer {
    fn default() -> Self {
        Self::new(RenderStyle::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BG: [u8; 3] = [20, 40, 60];
    const RED: [u8; 3] = [255, 0, 0];

    fn state(boxes: Vec<BoundingBox>) -> DetectionState {
        DetectionState {
            target_present: !boxes.is_empty(),
            boxes,
        }
    }

    #[test]
    fn empty_state_renders_identical_copy() -> Result<()> {
        let frame = Frame::filled(64, 48, BG)?;
        let out = AnnotationRenderer::default().render(&frame, &DetectionState::empty());

        assert_eq!(out.as_raw().as_slice(), frame.pixels());
        Ok(())
    }

    #[test]
    fn box_outline_lands_on_exact_coordinates() -> Result<()> {
        let frame = Frame::filled(100, 100, BG)?;
        let bbox = BoundingBox::new(10, 30, 50, 70)?;
        let out = AnnotationRenderer::default().render(&frame, &state(vec![bbox]));

        for (x, y) in [(10, 30), (50, 30), (10, 70), (50, 70), (30, 30), (10, 50)] {
            assert_eq!(out.get_pixel(x, y).0, RED, "edge pixel ({}, {})", x, y);
        }
        // Thickness 3 grows inward.
        assert_eq!(out.get_pixel(12, 50).0, RED);
        assert_eq!(out.get_pixel(13, 50).0, BG);
        // Nothing outside the box on the right or below.
        assert_eq!(out.get_pixel(51, 50).0, BG);
        assert_eq!(out.get_pixel(30, 71).0, BG);
        assert_eq!(out.get_pixel(9, 50).0, BG);
        Ok(())
    }

    #[test]
    fn render_does_not_touch_source_frame() -> Result<()> {
        let frame = Frame::filled(100, 100, BG)?;
        let bbox = BoundingBox::new(10, 30, 50, 70)?;
        let _ = AnnotationRenderer::default().render(&frame, &state(vec![bbox]));

        assert!(frame.pixels().chunks(3).all(|px| px == BG));
        Ok(())
    }

    #[test]
    fn caption_sits_above_box() -> Result<()> {
        let renderer = AnnotationRenderer::default();
        let bbox = BoundingBox::new(10, 60, 50, 90)?;
        let rect = renderer.caption_rect(&bbox).expect("caption");

        // 60 - 10 gap - 22 height
        assert_eq!(rect.top(), 28);
        assert_eq!(rect.bottom(), 49);
        assert_eq!(rect.left(), 10);

        let frame = Frame::filled(100, 100, BG)?;
        let out = renderer.render(&frame, &state(vec![bbox]));
        // Text starts one row below the band top.
        assert_eq!(out.get_pixel(20, 28).0, RED);
        assert_eq!(out.get_pixel(20, 55).0, BG);
        Ok(())
    }

    #[test]
    fn caption_is_clamped_at_top_edge() -> Result<()> {
        let renderer = AnnotationRenderer::default();
        let bbox = BoundingBox::new(10, 5, 50, 40)?;
        let rect = renderer.caption_rect(&bbox).expect("caption");

        assert_eq!(rect.top(), 0);
        assert_eq!(rect.height(), 22);

        let frame = Frame::filled(64, 64, BG)?;
        let out = renderer.render(&frame, &state(vec![bbox]));
        assert_eq!(out.get_pixel(20, 0).0, RED);
        Ok(())
    }

    #[test]
    fn every_box_gets_outline_and_caption() -> Result<()> {
        let frame = Frame::filled(200, 200, BG)?;
        let boxes = vec![
            BoundingBox::new(10, 50, 40, 80)?,
            BoundingBox::new(120, 150, 180, 190)?,
        ];
        let out = AnnotationRenderer::default().render(&frame, &state(boxes));

        assert_eq!(out.get_pixel(10, 50).0, RED);
        assert_eq!(out.get_pixel(180, 190).0, RED);
        assert_eq!(out.get_pixel(125, 118).0, RED);
        Ok(())
    }

    #[test]
    fn boxes_past_the_frame_edge_are_clipped() -> Result<()> {
        let frame = Frame::filled(32, 32, BG)?;
        let bbox = BoundingBox::new(20, 20, 80, 80)?;
        let out = AnnotationRenderer::default().render(&frame, &state(vec![bbox]));

        assert_eq!(out.dimensions(), (32, 32));
        assert_eq!(out.get_pixel(20, 25).0, RED);
        Ok(())
    }

    #[test]
    fn caption_text_reaches_the_pixels() -> Result<()> {
        let frame = Frame::filled(320, 120, BG)?;
        let boxes = state(vec![BoundingBox::new(10, 60, 90, 110)?]);
        let render_with = |caption: &str| {
            AnnotationRenderer::new(RenderStyle {
                caption: caption.to_string(),
                ..RenderStyle::default()
            })
            .render(&frame, &boxes)
        };

        let default_renderer = AnnotationRenderer::default();
        assert!(default_renderer.has_font());

        let warning = render_with(DEFAULT_CAPTION);
        let other = render_with("PHONE AWAY");
        let blank = render_with("");
        assert_ne!(warning.as_raw(), blank.as_raw());
        assert_ne!(warning.as_raw(), other.as_raw());

        // The band is pure red, so a strong green channel means text.
        let rect = default_renderer
            .caption_rect(&BoundingBox::new(10, 60, 90, 110)?)
            .expect("caption");
        let has_text = (rect.top() as u32..rect.bottom() as u32).any(|y| {
            (rect.left() as u32..(rect.right() as u32).min(319))
                .any(|x| warning.get_pixel(x, y).0[1] > 200)
        });
        assert!(has_text);
        Ok(())
    }

    #[test]
    fn huge_boxes_render_without_overflow() -> Result<()> {
        let frame = Frame::filled(40, 40, BG)?;
        let bbox = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX)?;
        assert_eq!(bbox.width(), u32::MAX);
        assert_eq!(bbox.height(), u32::MAX);

        let out = AnnotationRenderer::default().render(&frame, &state(vec![bbox]));
        // Every edge is off-canvas, so only the clamped caption band shows.
        assert_eq!(out.get_pixel(20, 39).0, BG);
        assert_eq!(out.dimensions(), (40, 40));

        let far = BoundingBox::new(i32::MAX - 10, i32::MAX - 10, i32::MAX, i32::MAX)?;
        let out = AnnotationRenderer::default().render(&frame, &state(vec![far]));
        assert_eq!(out.as_raw().as_slice(), frame.pixels());
        Ok(())
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let result = AnnotationRenderer::default().with_font_file("/nonexistent/font.ttf");
        assert!(result.is_err());
    }
}
