// src/error.rs

use thiserror::Error;

/// Everything the pipeline can fail with.
///
/// None of these are fatal to a session: callers log them and degrade
/// (no live preview, no offline waveform) while recording and playback
/// carry on.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Recording was refused; the UI stays idle.
    #[error("microphone access denied")]
    PermissionDenied,

    /// The source file could not be opened or parsed as audio.
    #[error("could not decode audio: {0}")]
    DecodeFailure(String),

    /// The relay worker context could not be created.
    #[error("could not spawn relay worker: {0}")]
    WorkerSpawnFailure(String),

    /// Scrub target outside `[0, 1]` of the known duration.
    #[error("seek fraction {fraction} is outside [0, 1]")]
    InvalidSeek { fraction: f64 },

    /// A waveform violated its shape invariants or its file was malformed.
    #[error("invalid waveform: {0}")]
    InvalidWaveform(String),

    /// cpal reported a device or stream problem.
    #[error("audio device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn device(err: impl std::fmt::Display) -> Self {
        Self::Device(err.to_string())
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::DecodeFailure(err.to_string())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
