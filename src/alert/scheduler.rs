use std::time::{Duration, Instant};

use super::sink::AudioSink;
use crate::tracker::DetectionState;

pub const DEFAULT_COOLDOWN_SECS: u64 = 11;

/// What happened to the audio sink when an alert fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Started,
    /// Previous clip still running; no new playback requested.
    AlreadyPlaying,
    /// Sink refused or errored. The alert still counts as fired.
    Failed,
}

/// Result of one `maybe_fire` evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FireDecision {
    /// Target not present. Cooldown untouched.
    NoTarget,
    /// Target present but the last alert is too recent.
    SuppressedByCooldown,
    Fired(PlaybackOutcome),
}

impl FireDecision {
    pub fn fired(&self) -> bool {
        matches!(self, FireDecision::Fired(_))
    }
}

/// Rate-limits alerts to one per cooldown window.
///
/// The window is measured from the last time an alert fired, never from when
/// the target disappeared. Evaluation is lazy: a continuously present target
/// fires at the first frame after the window has elapsed.
#[derive(Debug)]
pub struct AlertScheduler {
    cooldown: Duration,
    last_fired_at: Option<Instant>,
    fired_count: u64,
}

impl AlertScheduler {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired_at: None,
            fired_count: 0,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_fired_at(&self) -> Option<Instant> {
        self.last_fired_at
    }

    pub fn fired_count(&self) -> u64 {
        self.fired_count
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        let Some(last) = self.last_fired_at else {
            return true;
        };
        if self.cooldown.is_zero() {
            return true;
        }
        now.saturating_duration_since(last) > self.cooldown
    }

    /// Decide whether this frame fires an alert, and start playback if so.
    ///
    /// Playback is only requested when the sink is idle. A playback error is
    /// logged and otherwise ignored; the fire time is recorded either way.
    pub fn maybe_fire(
        &mut self,
        state: &DetectionState,
        now: Instant,
        sink: &mut dyn AudioSink,
    ) -> FireDecision {
        if !state.target_present {
            return FireDecision::NoTarget;
        }
        if !self.cooldown_elapsed(now) {
            return FireDecision::SuppressedByCooldown;
        }

        // Keep last_fired_at monotonic even if a caller hands us an older instant.
        self.last_fired_at = Some(match self.last_fired_at {
            Some(last) if last > now => last,
            _ => now,
        });
        self.fired_count += 1;

        let outcome = if sink.is_playing() {
            PlaybackOutcome::AlreadyPlaying
        } else {
            match sink.start_playback() {
                Ok(()) => PlaybackOutcome::Started,
                Err(err) => {
                    log::warn!("alert playback failed: {:#}", err);
                    PlaybackOutcome::Failed
                }
            }
        };
        FireDecision::Fired(outcome)
    }
}

impl Default for AlertScheduler {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_COOLDOWN_SECS))
    }
}
