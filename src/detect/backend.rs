use anyhow::Result;

use crate::frame::Frame;

use super::result::Detection;

/// Object detector backend.
///
/// A backend is an opaque `frame -> detections` function. It receives the frame
/// by shared reference and must not retain pixels past the `detect` call.
/// Returned boxes are in the pixel space of the frame that was passed in.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Errors are recoverable from the caller's point of view: the processing
    /// loop keeps its previous detection state and moves on to the next frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
