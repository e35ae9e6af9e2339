// src/lib.rs

pub mod audio;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod extractor;
pub mod playback;
pub mod preview;
pub mod recorder;
pub mod relay;
pub mod waveform;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use extractor::{ExtractionHandle, WaveformExtractor, WaveformProgress, spawn_extraction};
pub use playback::{PlaybackController, PlaybackEvent, PlayerState, fraction};
pub use preview::LivePreview;
pub use recorder::meter::AmplitudeSample;
pub use recorder::{CpalRecorder, MicrophoneCapture, RecordState};
pub use relay::{RelayHost, RelayMessage};
pub use waveform::Waveform; // convenience
