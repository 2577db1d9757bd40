use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Audio output used for alerts.
pub trait AudioSink: Send {
    /// True while a previously started clip is still playing.
    fn is_playing(&mut self) -> bool;

    /// Start playing the alert clip from the beginning.
    fn start_playback(&mut self) -> Result<()>;
}

/// Plays the alert clip by spawning an external player process.
///
/// `player` is the program plus leading arguments; the audio file path is
/// appended as the last argument, e.g. `["mpg123", "-q"]`.
pub struct CommandAudioSink {
    player: Vec<String>,
    audio_file: PathBuf,
    child: Option<Child>,
}

impl CommandAudioSink {
    pub fn new(player: Vec<String>, audio_file: impl Into<PathBuf>) -> Result<Self> {
        if player.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(anyhow!("audio player command must not be empty"));
        }
        let audio_file = audio_file.into();
        if !audio_file.exists() {
            log::error!(
                "audio file {} not found; alerts will be logged without sound",
                audio_file.display()
            );
        }
        Ok(Self {
            player,
            audio_file,
            child: None,
        })
    }

    pub fn audio_file(&self) -> &Path {
        &self.audio_file
    }
}

impl AudioSink for CommandAudioSink {
    fn is_playing(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    log::warn!("audio player exited with {}", status);
                }
                self.child = None;
                false
            }
            Err(err) => {
                log::warn!("audio player status unavailable: {}", err);
                self.child = None;
                false
            }
        }
    }

    fn start_playback(&mut self) -> Result<()> {
        if !self.audio_file.exists() {
            return Err(anyhow!(
                "audio file {} not found",
                self.audio_file.display()
            ));
        }
        let (program, args) = self
            .player
            .split_first()
            .ok_or_else(|| anyhow!("audio player command must not be empty"))?;
        let child = Command::new(program)
            .args(args)
            .arg(&self.audio_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn audio player {}", program))?;
        self.child = Some(child);
        Ok(())
    }
}

impl Drop for CommandAudioSink {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Sink with no audio device: every alert is only logged.
#[derive(Debug, Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn is_playing(&mut self) -> bool {
        false
    }

    fn start_playback(&mut self) -> Result<()> {
        log::debug!("alert playback requested (no audio sink configured)");
        Ok(())
    }
}

/// Sink that counts playback requests. Clones share counters.
///
/// `set_playing` simulates a clip that is still running; `set_failing` makes
/// every start request error out.
#[derive(Clone, Debug, Default)]
pub struct RecordingAudioSink {
    starts: Arc<AtomicU64>,
    playing: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
}

impl RecordingAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl AudioSink for RecordingAudioSink {
    fn is_playing(&mut self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn start_playback(&mut self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("audio device unavailable"));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
