//! Phone Sentinel
//!
//! Watches a camera for a mobile phone, sounds an audio alert when one shows
//! up, and serves the annotated feed as an MJPEG stream to any number of
//! browsers.
//!
//! # Architecture
//!
//! One sequential loop per camera drives every frame through
//! capture → (every Nth frame) inference → state update → alert check →
//! annotation → JPEG encode → broadcast. The loop is the only writer of the
//! detection state and the alert cooldown, so neither needs locking.
//! Viewers read from their own bounded, drop-oldest queues and can never stall
//! the loop.
//!
//! # Module Structure
//!
//! - `frame`: captured RGB frames and pixel boxes
//! - `ingest`: frame sources (synthetic, V4L2, RTSP)
//! - `detect`: detector backends (stub, scripted, tract YOLOv8) and COCO labels
//! - `tracker`: frame-skip cadence and the persisted detection state
//! - `alert`: cooldown scheduling, clocks and audio sinks
//! - `render`: box and caption annotation
//! - `encode`: JPEG compression
//! - `stream`: multipart framing and viewer fan-out
//! - `pipeline`: the processing loop
//! - `server`: landing page, video feed and health endpoint
//! - `config`: file/env configuration

pub mod alert;
pub mod config;
pub mod detect;
pub mod encode;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod stream;
pub mod tracker;

pub use alert::{
    AlertScheduler, AudioSink, Clock, CommandAudioSink, FireDecision, ManualClock, NullAudioSink,
    PlaybackOutcome, RecordingAudioSink, SystemClock,
};
pub use config::SentinelConfig;
pub use detect::{Detection, DetectorBackend, ScriptedBackend, ScriptedResponse, StubBackend};
#[cfg(feature = "backend-tract")]
pub use detect::{TractYoloBackend, YoloSettings};
pub use encode::{FrameEncoder, JpegFrameEncoder};
pub use frame::{BoundingBox, Frame};
#[cfg(feature = "rtsp-gstreamer")]
pub use ingest::RtspSource;
#[cfg(feature = "ingest-v4l2")]
pub use ingest::V4l2Source;
pub use ingest::{open_source, CaptureConfig, FrameSource, SourceStats, SyntheticSource};
pub use pipeline::{FrameReport, InferenceOutcome, Pipeline, PipelineStats, StopCause};
pub use render::{AnnotationRenderer, RenderStyle};
pub use server::{ServerConfig, ServerHandle, StreamServer};
pub use stream::{FrameBroadcaster, ViewerStream};
pub use tracker::{DetectionState, DetectionStateTracker, TrackerConfig};
