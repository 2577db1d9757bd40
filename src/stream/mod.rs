//! Live delivery of encoded frames to any number of viewers.
//!
//! - `multipart`: `multipart/x-mixed-replace` part framing.
//! - `broadcast`: fan-out with one bounded drop-oldest queue per viewer, so a
//!   slow viewer never stalls the capture loop.

pub mod broadcast;
pub mod multipart;

pub use broadcast::{
    BroadcastStats, FrameBroadcaster, Part, ViewerPoll, ViewerStream, DEFAULT_VIEWER_QUEUE_DEPTH,
};
pub use multipart::{encode_part, response_content_type, BOUNDARY};
