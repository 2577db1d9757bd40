//! The capture → detect → alert → render → encode loop.
//!
//! `Pipeline` owns one camera's worth of state and is its only writer. Each
//! `step` handles exactly one captured frame; `produce_frames` turns the steps
//! into the lazy part sequence the stream layer fans out to viewers.
//!
//! Only capture failure (or end-of-stream, or a shutdown request) stops the
//! loop. Inference, audio and encoding failures are logged and the loop moves
//! on to the next frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::alert::{AlertScheduler, AudioSink, Clock, FireDecision, NullAudioSink, SystemClock};
use crate::detect::DetectorBackend;
use crate::encode::{FrameEncoder, JpegFrameEncoder};
use crate::ingest::{FrameSource, SourceStats};
use crate::render::AnnotationRenderer;
use crate::stream::encode_part;
use crate::tracker::{DetectionState, DetectionStateTracker, TrackerStep};

/// Why the loop stopped producing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopCause {
    /// The source reported a clean end-of-stream.
    SourceEnded,
    /// Connecting to or reading from the source failed.
    SourceFailed(String),
    /// The shared shutdown flag was raised.
    Shutdown,
}

impl StopCause {
    pub fn is_failure(&self) -> bool {
        matches!(self, StopCause::SourceFailed(_))
    }
}

impl std::fmt::Display for StopCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopCause::SourceEnded => write!(f, "source reached end of stream"),
            StopCause::SourceFailed(reason) => write!(f, "source failed: {}", reason),
            StopCause::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// What happened to inference on one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceOutcome {
    Skipped,
    Ran,
    /// The detector errored; detection state was left as it was.
    Failed,
}

/// Everything one `step` did.
#[derive(Debug)]
pub struct FrameReport {
    /// 1-based frame counter.
    pub index: u64,
    pub inference: InferenceOutcome,
    /// `None` when inference failed on this frame and the alert check was
    /// not run.
    pub alert: Option<FireDecision>,
    /// Detection state the frame was rendered with.
    pub state: DetectionState,
    /// Framed multipart part, or `None` if encoding failed.
    pub part: Option<Vec<u8>>,
}

/// Running counters for one pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub inference_runs: u64,
    pub inference_failures: u64,
    pub alerts_fired: u64,
    pub encode_failures: u64,
    pub parts_emitted: u64,
}

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    tracker: DetectionStateTracker,
    scheduler: AlertScheduler,
    sink: Box<dyn AudioSink>,
    clock: Box<dyn Clock>,
    renderer: AnnotationRenderer,
    encoder: Box<dyn FrameEncoder>,
    shutdown: Arc<AtomicBool>,
    connected: bool,
    frame_index: u64,
    stats: PipelineStats,
    stop_cause: Option<StopCause>,
}

impl Pipeline {
    /// Build a pipeline with a silent audio sink, the system clock, the
    /// default renderer and a default-quality JPEG encoder.
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        tracker: DetectionStateTracker,
        scheduler: AlertScheduler,
    ) -> Self {
        Self {
            source,
            detector,
            tracker,
            scheduler,
            sink: Box::new(NullAudioSink),
            clock: Box::new(SystemClock),
            renderer: AnnotationRenderer::default(),
            encoder: Box::new(JpegFrameEncoder::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            connected: false,
            frame_index: 0,
            stats: PipelineStats::default(),
            stop_cause: None,
        }
    }

    pub fn with_audio_sink(mut self, sink: Box<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_renderer(mut self, renderer: AnnotationRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_encoder(mut self, encoder: Box<dyn FrameEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Share an externally owned stop flag (e.g. one raised by Ctrl-C).
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    pub fn source_healthy(&self) -> bool {
        self.connected && self.source.is_healthy()
    }

    pub fn current_state(&self) -> &DetectionState {
        self.tracker.current_state()
    }

    pub fn scheduler(&self) -> &AlertScheduler {
        &self.scheduler
    }

    /// Index of the last captured frame; 0 before the first one.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn stop_cause(&self) -> Option<&StopCause> {
        self.stop_cause.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_cause.is_some()
    }

    fn stop(&mut self, cause: StopCause) {
        match &cause {
            StopCause::SourceFailed(reason) => {
                log::error!("pipeline stopped: capture failed: {}", reason)
            }
            other => log::info!("pipeline stopped: {}", other),
        }
        self.stop_cause = Some(cause);
    }

    /// Process one frame. Returns `None` once the pipeline has stopped; it
    /// never restarts after that.
    pub fn step(&mut self) -> Option<FrameReport> {
        if self.stop_cause.is_some() {
            return None;
        }
        if self.shutdown.load(Ordering::SeqCst) {
            self.stop(StopCause::Shutdown);
            return None;
        }

        if !self.connected {
            if let Err(err) = self.source.connect() {
                self.stop(StopCause::SourceFailed(format!("{:#}", err)));
                return None;
            }
            self.connected = true;
        }

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.stop(StopCause::SourceEnded);
                return None;
            }
            Err(err) => {
                self.stop(StopCause::SourceFailed(format!("{:#}", err)));
                return None;
            }
        };
        self.frame_index += 1;
        self.stats.frames_captured += 1;
        let index = self.frame_index;

        let inference = match self.tracker.observe(index, &frame, self.detector.as_mut()) {
            Ok(TrackerStep::Skipped) => InferenceOutcome::Skipped,
            Ok(TrackerStep::Inferred) => {
                self.stats.inference_runs += 1;
                InferenceOutcome::Ran
            }
            Err(err) => {
                self.stats.inference_failures += 1;
                log::warn!("{:#}", err);
                InferenceOutcome::Failed
            }
        };

        let alert = if inference == InferenceOutcome::Failed {
            None
        } else {
            let now = self.clock.now();
            let decision = self.scheduler.maybe_fire(
                self.tracker.current_state(),
                now,
                self.sink.as_mut(),
            );
            if let FireDecision::Fired(playback) = decision {
                self.stats.alerts_fired += 1;
                log::warn!(
                    "ALERT: {} detected on frame {} ({} box(es), playback {:?})",
                    self.tracker.config().target_class,
                    index,
                    self.tracker.current_state().boxes.len(),
                    playback
                );
            }
            Some(decision)
        };

        let state = self.tracker.current_state().clone();
        let annotated = self.renderer.render(&frame, &state);
        drop(frame);

        let part = match self.encoder.encode(&annotated) {
            Ok(bytes) => {
                self.stats.parts_emitted += 1;
                Some(encode_part(self.encoder.content_type(), &bytes))
            }
            Err(err) => {
                self.stats.encode_failures += 1;
                log::warn!("frame {} dropped: {:#}", index, err);
                None
            }
        };

        Some(FrameReport {
            index,
            inference,
            alert,
            state,
            part,
        })
    }

    /// Lazy sequence of framed parts, one per successfully encoded frame.
    ///
    /// Frames that fail to encode are skipped. The sequence ends when the
    /// pipeline stops and cannot be restarted.
    pub fn produce_frames(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        std::iter::from_fn(move || loop {
            let report = self.step()?;
            if let Some(part) = report.part {
                return Some(part);
            }
        })
    }
}
