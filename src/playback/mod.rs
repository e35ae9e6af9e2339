// src/playback/mod.rs

pub mod player;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::waveform::Waveform;

pub use player::CpalPlayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// What a playback backend reports back, in order, on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    StateChanged(PlayerState),
    PositionChanged(Duration),
    DurationChanged(Duration),
    Completed,
}

/// Commands the controller issues to whatever is actually producing sound.
pub trait PlaybackBackend {
    fn play(&mut self, source: &Path) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn seek(&mut self, position: Duration) -> Result<()>;

    /// Finishes work a command started in the background, such as a decode
    /// kicked off by `play`. Called from the host loop; never blocks.
    fn poll(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackState {
    pub player: PlayerState,
    pub position: Duration,
    /// `None` until the backend reports it.
    pub duration: Option<Duration>,
}

/// `position / duration`, or 0 unless the duration is known and
/// `0 < position < duration`.
pub fn fraction(position: Duration, duration: Option<Duration>) -> f64 {
    match duration {
        Some(d) if !position.is_zero() && position < d => {
            position.as_secs_f64() / d.as_secs_f64()
        }
        _ => 0.0,
    }
}

/// Playback position state machine. The state only changes through the
/// command methods and [`apply`](Self::apply).
pub struct PlaybackController<B> {
    backend: B,
    state: PlaybackState,
    source: Option<PathBuf>,
}

impl<B: PlaybackBackend> PlaybackController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: PlaybackState::default(),
            source: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Selects the file the next `play` starts. Anything playing is stopped.
    pub fn load(&mut self, source: impl Into<PathBuf>) -> Result<()> {
        if self.state.player != PlayerState::Stopped {
            self.stop()?;
        }
        self.source = Some(source.into());
        self.state = PlaybackState::default();
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        match self.state.player {
            PlayerState::Playing => return Ok(()),
            PlayerState::Paused => self.backend.resume()?,
            PlayerState::Stopped => {
                let Some(source) = self.source.as_deref() else {
                    log::debug!("Nothing loaded, play ignored");
                    return Ok(());
                };
                log::info!("Playing {}", source.display());
                self.backend.play(source)?;
            }
        }
        self.state.player = PlayerState::Playing;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.state.player == PlayerState::Playing {
            self.backend.pause()?;
            self.state.player = PlayerState::Paused;
        }
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<()> {
        match self.state.player {
            PlayerState::Playing => self.pause(),
            _ => self.play(),
        }
    }

    pub fn stop(&mut self) -> Result<()> {
        self.backend.stop()?;
        self.state.player = PlayerState::Stopped;
        self.state.position = Duration::ZERO;
        Ok(())
    }

    /// Seeks to `fraction` of the known duration. Out-of-range targets are
    /// clamped into `[0, 1]`; without a duration nothing happens.
    pub fn scrub(&mut self, fraction: f64) -> Result<()> {
        let Some(duration) = self.state.duration else {
            log::debug!("Scrub before duration is known, ignored");
            return Ok(());
        };
        let fraction = if (0.0..=1.0).contains(&fraction) {
            fraction
        } else {
            log::warn!("{}; clamping", PipelineError::InvalidSeek { fraction });
            if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) }
        };
        let target = duration.mul_f64(fraction);
        self.backend.seek(target)?;
        self.state.position = target;
        Ok(())
    }

    /// Moves the scrub position by `delta` of the duration. Unlike
    /// [`fraction`](Self::fraction), the end of the track counts as 1.
    pub fn nudge(&mut self, delta: f64) -> Result<()> {
        let base = match self.state.duration {
            Some(d) if !d.is_zero() => {
                (self.state.position.as_secs_f64() / d.as_secs_f64()).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };
        self.scrub((base + delta).clamp(0.0, 1.0))
    }

    /// Lets the backend finish background work. A failure there means
    /// playback never started, so the state falls back to stopped.
    pub fn poll_backend(&mut self) -> Result<()> {
        let result = self.backend.poll();
        if result.is_err() {
            self.state.player = PlayerState::Stopped;
            self.state.position = Duration::ZERO;
        }
        result
    }

    pub fn apply(&mut self, event: PlaybackEvent) -> Result<()> {
        match event {
            PlaybackEvent::StateChanged(player) => {
                self.state.player = player;
                if player == PlayerState::Stopped {
                    self.state.position = Duration::ZERO;
                }
            }
            PlaybackEvent::PositionChanged(position) => self.state.position = position,
            PlaybackEvent::DurationChanged(duration) => self.state.duration = Some(duration),
            PlaybackEvent::Completed => {
                log::debug!("Playback completed");
                self.stop()?;
            }
        }
        Ok(())
    }

    pub fn fraction(&self) -> f64 {
        fraction(self.state.position, self.state.duration)
    }

    /// Column of `waveform` under the playhead, once a duration is known.
    pub fn playhead_column(&self, waveform: &Waveform) -> Option<usize> {
        self.state.duration?;
        let last = waveform.length().saturating_sub(1) as u64;
        Some(waveform.column_at(self.state.position).min(last) as usize)
    }
}
