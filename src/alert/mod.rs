//! Alerting: cooldown bookkeeping and audio playback.

mod clock;
mod scheduler;
mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use scheduler::{AlertScheduler, FireDecision, PlaybackOutcome, DEFAULT_COOLDOWN_SECS};
pub use sink::{AudioSink, CommandAudioSink, NullAudioSink, RecordingAudioSink};
