// src/controller.rs

use std::fmt::Write as FmtWrite;
use std::io::{Write, stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::event::KeyCode;
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{BeginSynchronizedUpdate, Clear, ClearType, EndSynchronizedUpdate},
};
use tokio::sync::mpsc;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extractor::{ExtractionHandle, spawn_extraction};
use crate::playback::{CpalPlayer, PlaybackController, PlaybackEvent, PlayerState};
use crate::preview::LivePreview;
use crate::recorder::meter::AmplitudeSample;
use crate::recorder::{CpalRecorder, MicrophoneCapture, RecordState};
use crate::waveform::{Viewport, Waveform, render_all, render_tail, terminal};

const SCRUB_STEP: f64 = 0.05;

/// Terminal host: one recorder, its live preview, the offline waveform of
/// the last take and a player for it. Everything runs from `run_tick` on
/// the UI thread; the only work elsewhere is the relay worker, the
/// extraction job and the audio callbacks.
pub struct RecorderApp {
    config: PipelineConfig,
    output_path: PathBuf,
    scratch_dir: PathBuf,

    recorder: CpalRecorder,
    record_states: mpsc::Receiver<RecordState>,
    amplitudes: Option<mpsc::Receiver<AmplitudeSample>>,
    preview: LivePreview,

    extraction: Option<ExtractionHandle>,
    extraction_progress: f32,
    offline: Option<Waveform>,

    playback: PlaybackController<CpalPlayer>,
    playback_events: mpsc::Receiver<PlaybackEvent>,

    notice: Option<String>,
    draw_buffer: String,
}

impl RecorderApp {
    /// Must be called inside a tokio runtime for the live preview, the
    /// amplitude feed and extraction to work; without one they are
    /// disabled and logged.
    pub fn new(config: PipelineConfig, output_path: impl Into<PathBuf>) -> Self {
        let output_path = output_path.into();
        let mut recorder = CpalRecorder::new();
        let record_states = recorder.subscribe_state();
        let amplitudes = match recorder.subscribe_amplitude(config.sampler.amplitude_interval()) {
            Ok(rx) => Some(rx),
            Err(e) => {
                log::warn!("No amplitude feed: {e}");
                None
            }
        };
        let preview = LivePreview::new(config.sampler.clone(), &config.relay);
        let (player, playback_events) = CpalPlayer::new();

        let mut app = Self {
            config,
            output_path,
            scratch_dir: std::env::temp_dir(),
            recorder,
            record_states,
            amplitudes,
            preview,
            extraction: None,
            extraction_progress: 0.0,
            offline: None,
            playback: PlaybackController::new(player),
            playback_events,
            notice: None,
            draw_buffer: String::with_capacity(4096),
        };

        if app.output_path.is_file() {
            let path = app.output_path.clone();
            log::info!("Found existing take {}", path.display());
            app.begin_offline(&path);
        }
        app
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn offline_waveform(&self) -> Option<&Waveform> {
        self.offline.as_ref()
    }

    pub fn is_extracting(&self) -> bool {
        self.extraction.is_some()
    }

    pub fn run_tick(&mut self) -> Result<(), anyhow::Error> {
        self.pump();
        let lines = self.frame();

        self.draw_buffer.clear();
        let _ = write!(self.draw_buffer, "{}", MoveTo(0, 0));
        for line in &lines {
            let _ = write!(self.draw_buffer, "{line}\x1b[K\r\n");
        }
        let _ = write!(self.draw_buffer, "{}", Clear(ClearType::FromCursorDown));

        let mut stdout = stdout();
        execute!(stdout, BeginSynchronizedUpdate)?;
        stdout.write_all(self.draw_buffer.as_bytes())?;
        execute!(stdout, EndSynchronizedUpdate)?;
        stdout.flush()?;
        Ok(())
    }

    /// Drains every event stream without blocking.
    pub fn pump(&mut self) {
        while let Ok(state) = self.record_states.try_recv() {
            log::debug!("Record state event: {state:?}");
        }

        if let Some(rx) = self.amplitudes.as_mut() {
            while let Ok(sample) = rx.try_recv() {
                self.preview.on_amplitude(Some(sample));
            }
        }

        self.pump_extraction();

        if let Err(e) = self.playback.poll_backend() {
            log::error!("Playback failed to start: {e}");
            self.notice = Some(e.to_string());
        }
        while let Ok(event) = self.playback_events.try_recv() {
            if let Err(e) = self.playback.apply(event) {
                log::warn!("Playback event {event:?} failed: {e}");
            }
        }
    }

    fn pump_extraction(&mut self) {
        let Some(handle) = self.extraction.as_mut() else {
            return;
        };
        let mut finished = false;
        while let Some(event) = handle.try_next() {
            match event {
                Ok(progress) => {
                    self.extraction_progress = progress.progress;
                    finished = progress.is_complete();
                    self.offline = Some(progress.waveform);
                }
                Err(e) => {
                    // Logged by the extraction job; leave the view empty.
                    self.notice = Some(format!("Waveform unavailable: {e}"));
                    self.offline = None;
                    finished = true;
                }
            }
            if finished {
                break;
            }
        }
        if finished || handle.is_done() {
            self.extraction = None;
        }
    }

    /// The rows to draw: the waveform grid followed by a status line.
    pub fn frame(&mut self) -> Vec<String> {
        let rows = self.config.render.rows;
        let columns = self.config.render.columns;
        let height = rows as f32;

        let mut lines = if self.recorder.state() != RecordState::Stopped {
            match self.preview.poll() {
                Some(live) => {
                    let viewport = Viewport::new(1.0, self.config.render.live_scale, height);
                    let bars = render_tail(&live, columns, &viewport);
                    terminal::render_ascii(&bars, rows, None)
                }
                None => vec![String::new(); rows],
            }
        } else if let Some(wf) = &self.offline {
            let viewport = Viewport::new(1.0, self.config.render.offline_scale, height);
            let bars = terminal::fit_width(&render_all(wf, &viewport), columns);
            let playhead = self
                .playback
                .playhead_column(wf)
                .map(|c| c * bars.len() / wf.length().max(1) as usize);
            terminal::render_ascii(&bars, rows, playhead)
        } else {
            vec![String::new(); rows]
        };

        lines.push(self.status_line());
        lines
    }

    fn status_line(&self) -> String {
        let mut status = String::new();
        match self.recorder.state() {
            RecordState::Recording => {
                let _ = write!(status, "● REC {}", clock(self.recorder.record_time()));
            }
            RecordState::Paused => {
                let _ = write!(status, "‖ REC {} (paused)", clock(self.recorder.record_time()));
            }
            RecordState::Stopped => {
                let state = self.playback.state();
                let icon = match state.player {
                    PlayerState::Playing => "▶",
                    PlayerState::Paused => "⏸",
                    PlayerState::Stopped => "■",
                };
                let _ = write!(
                    status,
                    "{icon} {} / {}",
                    clock(state.position),
                    clock(state.duration.unwrap_or_default())
                );
                if self.extraction.is_some() {
                    let _ = write!(status, " | waveform {:3.0}%", self.extraction_progress * 100.0);
                }
            }
        }
        if !self.preview.is_enabled() {
            status.push_str(" | live preview off");
        }
        if let Some(notice) = &self.notice {
            let _ = write!(status, " | {notice}");
        }
        status.push_str("  [R]ec [P]ause [Space] play [←/→] scrub [Home] [S]top [Q]uit");
        status
    }

    pub fn should_quit(&self, key: KeyCode) -> bool {
        matches!(key, KeyCode::Char('q') | KeyCode::Char('Q'))
    }

    pub fn handle_key(&mut self, key: KeyCode) {
        let result = match key {
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.toggle_recording();
                Ok(())
            }
            KeyCode::Char('p') | KeyCode::Char('P') => self.toggle_pause_recording(),
            KeyCode::Char(' ') => self.playback.toggle(),
            KeyCode::Left => self.playback.nudge(-SCRUB_STEP),
            KeyCode::Right => self.playback.nudge(SCRUB_STEP),
            KeyCode::Home => self.playback.scrub(0.0),
            KeyCode::Char('s') | KeyCode::Char('S') => self.playback.stop(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::error!("{key:?} failed: {e}");
            self.notice = Some(e.to_string());
        }
    }

    fn toggle_recording(&mut self) {
        if self.recorder.state() == RecordState::Stopped {
            self.start_recording();
        } else if let Some(path) = self.recorder.stop() {
            self.begin_offline(&path);
        }
    }

    fn toggle_pause_recording(&mut self) -> Result<(), PipelineError> {
        match self.recorder.state() {
            RecordState::Recording => self.recorder.pause(),
            RecordState::Paused => self.recorder.resume(),
            RecordState::Stopped => Ok(()),
        }
    }

    fn start_recording(&mut self) {
        if !self.recorder.has_permission() {
            log::warn!("No microphone available");
            self.notice = Some(PipelineError::PermissionDenied.to_string());
            return;
        }
        if let Err(e) = self.playback.stop() {
            log::warn!("Could not stop playback: {e}");
        }
        // A new take replaces whatever the last one showed.
        self.extraction = None;
        self.offline = None;
        self.notice = None;
        self.preview.reset();

        match self.recorder.start(&self.output_path) {
            Ok(()) => {}
            Err(PipelineError::PermissionDenied) => {
                log::warn!("Recording refused");
                self.notice = Some(PipelineError::PermissionDenied.to_string());
            }
            Err(e) => {
                log::error!("Recording failed to start: {e}");
                self.notice = Some(e.to_string());
            }
        }
    }

    fn begin_offline(&mut self, path: &Path) {
        if let Err(e) = self.playback.load(path) {
            log::warn!("Could not load {} for playback: {e}", path.display());
        }
        self.offline = None;
        self.extraction_progress = 0.0;
        match spawn_extraction(path, &self.scratch_dir, &self.config.extractor) {
            Ok(handle) => self.extraction = Some(handle),
            Err(e) => {
                log::error!("Offline waveform disabled: {e}");
                self.notice = Some(e.to_string());
            }
        }
    }
}

/// `mm:ss.t`
fn clock(d: Duration) -> String {
    let tenths = d.as_millis() / 100;
    format!("{:02}:{:02}.{}", tenths / 600, (tenths / 10) % 60, tenths % 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_take(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..8_000 * seconds {
            writer.write_sample(((i % 40) as i16 - 20) * 500).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn clock_format() {
        assert_eq!(clock(Duration::ZERO), "00:00.0");
        assert_eq!(clock(Duration::from_millis(61_250)), "01:01.2");
    }

    #[tokio::test]
    async fn existing_take_is_extracted_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_take(&path, 2);

        let config = PipelineConfig::default();
        let mut app = RecorderApp::new(config.clone(), &path).with_scratch_dir(dir.path());
        assert!(app.is_extracting());

        for _ in 0..200 {
            app.pump();
            if !app.is_extracting() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let wf = app.offline_waveform().expect("no offline waveform");
        // 16000 / 256 = 62.5
        assert_eq!(wf.length(), 63);

        let lines = app.frame();
        assert_eq!(lines.len(), config.render.rows + 1);
        assert!(lines[..config.render.rows].iter().any(|l| l.contains('█')));
    }

    #[tokio::test]
    async fn broken_take_leaves_view_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, b"not a wav file at all").unwrap();

        let mut app =
            RecorderApp::new(PipelineConfig::default(), &path).with_scratch_dir(dir.path());
        for _ in 0..200 {
            app.pump();
            if !app.is_extracting() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(app.offline_waveform().is_none());
        let lines = app.frame();
        assert!(lines.last().unwrap().contains("Waveform unavailable"));
    }

    #[tokio::test]
    async fn transport_keys_without_a_take_are_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = RecorderApp::new(PipelineConfig::default(), dir.path().join("none.wav"));
        for key in [KeyCode::Char(' '), KeyCode::Left, KeyCode::Right, KeyCode::Home, KeyCode::Char('s'), KeyCode::Char('p')] {
            app.handle_key(key);
        }
        assert!(app.should_quit(KeyCode::Char('q')));
        assert!(!app.should_quit(KeyCode::Char('x')));
        assert!(app.offline_waveform().is_none());
    }
}
