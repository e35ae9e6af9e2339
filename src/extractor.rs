// src/extractor.rs

use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ExtractorConfig;
use crate::decoder::{SourceStream, dsp};
use crate::error::{PipelineError, Result};
use crate::waveform::{WAVEFORM_VERSION, Waveform};

/// One step of an extraction. The last event of a successful run has
/// `progress == 1.0` and covers the whole file.
#[derive(Debug, Clone)]
pub struct WaveformProgress {
    pub progress: f32,
    pub waveform: Waveform,
}

impl WaveformProgress {
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }
}

/// Folds a mono sample stream into (min, max) columns.
struct ColumnFolder {
    samples_per_pixel: u32,
    eight_bit: bool,
    filled: u32,
    min: f32,
    max: f32,
    data: Vec<i16>,
}

impl ColumnFolder {
    fn new(samples_per_pixel: u32, eight_bit: bool) -> Self {
        Self {
            samples_per_pixel: samples_per_pixel.max(1),
            eight_bit,
            filled: 0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            data: Vec::new(),
        }
    }

    fn push(&mut self, sample: f32) {
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.filled += 1;
        if self.filled == self.samples_per_pixel {
            self.flush();
        }
    }

    /// Closes the current column, even if it is only partly filled.
    fn flush(&mut self) {
        if self.filled == 0 {
            return;
        }
        let (min, max) = (self.quantize(self.min), self.quantize(self.max));
        self.data.push(min);
        self.data.push(max);
        self.filled = 0;
        self.min = f32::INFINITY;
        self.max = f32::NEG_INFINITY;
    }

    fn quantize(&self, v: f32) -> i16 {
        let full_scale = if self.eight_bit { 128.0 } else { 32_768.0 };
        (v.clamp(-1.0, 1.0) * full_scale)
            .round()
            .clamp(-full_scale, full_scale - 1.0) as i16
    }

    fn columns(&self) -> usize {
        self.data.len() / 2
    }
}

struct Decoding {
    source: SourceStream,
    folder: ColumnFolder,
    sample_rate: Option<u32>,
    total_frames: Option<u64>,
    frames: u64,
    next_mark: f32,
}

impl Decoding {
    fn open(path: &Path, config: &ExtractorConfig) -> Result<Self> {
        let source = SourceStream::open(path)?;
        let total_frames = source.n_frames().filter(|&n| n > 0);
        log::debug!(
            "Extracting {} ({:?} frames @ {:?} Hz)",
            path.display(),
            total_frames,
            source.sample_rate()
        );
        Ok(Self {
            sample_rate: source.sample_rate(),
            source,
            folder: ColumnFolder::new(config.samples_per_pixel, config.bits == 8),
            total_frames,
            frames: 0,
            next_mark: config.progress_step,
        })
    }

    /// Decodes and folds one packet; `false` at end of stream.
    fn step(&mut self) -> Result<bool> {
        let Some(block) = self.source.next_block()? else {
            return Ok(false);
        };
        self.sample_rate.get_or_insert(block.sample_rate);
        self.frames += block.frames() as u64;
        for sample in dsp::mono_frames(block.samples, block.channels) {
            self.folder.push(sample);
        }
        Ok(true)
    }

    fn partial_event(&mut self, step: f32, flags: u32) -> Option<WaveformProgress> {
        let total = self.total_frames?;
        let progress = (self.frames as f64 / total as f64).min(1.0) as f32;
        if progress < self.next_mark || progress >= 1.0 {
            return None;
        }
        while self.next_mark <= progress {
            self.next_mark += step;
        }
        if self.folder.columns() == 0 {
            return None;
        }
        let waveform = Waveform::new(
            WAVEFORM_VERSION,
            flags,
            self.sample_rate?,
            self.folder.samples_per_pixel,
            self.folder.data.clone(),
        )
        .ok()?;
        Some(WaveformProgress { progress, waveform })
    }
}

enum Stage {
    Pending,
    Decoding(Box<Decoding>),
    Done,
}

/// Lazy, single-pass extraction of a [`Waveform`] from an audio file.
///
/// Nothing is opened until the first call to `next`. A failure is yielded
/// once as `Err`, after which the iterator is exhausted; so is a successful
/// run after its final event.
///
/// Rounding: a trailing partial column is kept, so the column count is
/// `ceil(frames / samples_per_pixel)`.
pub struct WaveformExtractor {
    path: PathBuf,
    scratch_dir: PathBuf,
    config: ExtractorConfig,
    stage: Stage,
    cancel: Option<Arc<AtomicBool>>,
}

impl WaveformExtractor {
    pub fn new(
        path: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            path: path.into(),
            scratch_dir: scratch_dir.into(),
            config,
            stage: Stage::Pending,
            cancel: None,
        }
    }

    /// Stops at the next packet boundary once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn complete(&self, mut decoding: Box<Decoding>) -> Result<WaveformProgress> {
        decoding.folder.flush();
        if decoding.folder.columns() == 0 {
            return Err(PipelineError::DecodeFailure(format!(
                "{}: no audio frames decoded",
                self.path.display()
            )));
        }
        let sample_rate = decoding
            .sample_rate
            .ok_or_else(|| PipelineError::DecodeFailure("unknown sample rate".into()))?;

        let waveform = Waveform::new(
            WAVEFORM_VERSION,
            self.config.flags(),
            sample_rate,
            decoding.folder.samples_per_pixel,
            std::mem::take(&mut decoding.folder.data),
        )?;
        let waveform = through_scratch_file(&waveform, &self.scratch_dir)?;

        log::info!(
            "Extracted {} columns ({:.2}s) from {}",
            waveform.length(),
            waveform.duration().as_secs_f64(),
            self.path.display()
        );
        Ok(WaveformProgress {
            progress: 1.0,
            waveform,
        })
    }
}

impl Iterator for WaveformExtractor {
    type Item = Result<WaveformProgress>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut decoding = match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Done => return None,
            Stage::Pending => match Decoding::open(&self.path, &self.config) {
                Ok(decoding) => Box::new(decoding),
                Err(e) => return Some(Err(e)),
            },
            Stage::Decoding(decoding) => decoding,
        };

        loop {
            if self.is_cancelled() {
                log::debug!("Extraction of {} cancelled", self.path.display());
                return None;
            }
            match decoding.step() {
                Ok(true) => {
                    let flags = self.config.flags();
                    if let Some(event) = decoding.partial_event(self.config.progress_step, flags) {
                        self.stage = Stage::Decoding(decoding);
                        return Some(Ok(event));
                    }
                }
                Ok(false) => return Some(self.complete(decoding)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Writes `waveform` to a scratch file in `dir` and reads it back. The file
/// is removed when this returns.
fn through_scratch_file(waveform: &Waveform, dir: &Path) -> Result<Waveform> {
    let mut scratch = tempfile::Builder::new()
        .prefix("waveform-")
        .suffix(".wfm")
        .tempfile_in(dir)?;
    {
        let mut writer = BufWriter::new(scratch.as_file_mut());
        waveform.write_to(&mut writer)?;
        writer.flush()?;
    }
    let reader = BufReader::new(scratch.reopen()?);
    Waveform::read_from(reader)
}

/// Async view of a running extraction.
///
/// Dropping the handle cancels the decode; whatever it was producing is
/// discarded.
pub struct ExtractionHandle {
    events: mpsc::Receiver<Result<WaveformProgress>>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Runs a [`WaveformExtractor`] on tokio's blocking pool.
pub fn spawn_extraction(
    path: impl Into<PathBuf>,
    scratch_dir: impl Into<PathBuf>,
    config: &ExtractorConfig,
) -> Result<ExtractionHandle> {
    let handle =
        Handle::try_current().map_err(|e| PipelineError::WorkerSpawnFailure(e.to_string()))?;
    let cancel = Arc::new(AtomicBool::new(false));
    let extractor =
        WaveformExtractor::new(path, scratch_dir, config.clone()).with_cancel(cancel.clone());
    let (tx, events) = mpsc::channel(16);

    let task = handle.spawn_blocking(move || {
        let path = extractor.path().to_path_buf();
        for event in extractor {
            if let Err(e) = &event {
                log::error!("Extraction of {} failed: {e}", path.display());
            }
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });

    Ok(ExtractionHandle {
        events,
        cancel,
        task,
    })
}

impl ExtractionHandle {
    pub async fn next(&mut self) -> Option<Result<WaveformProgress>> {
        self.events.recv().await
    }

    /// Non-blocking poll for the host loop.
    pub fn try_next(&mut self) -> Option<Result<WaveformProgress>> {
        self.events.try_recv().ok()
    }

    /// True once the decode task has exited and every event was consumed.
    pub fn is_done(&self) -> bool {
        self.task.is_finished() && self.events.is_empty()
    }

    /// Skips progress events and returns the complete waveform.
    pub async fn finish(mut self) -> Result<Waveform> {
        while let Some(event) = self.next().await {
            let event = event?;
            if event.is_complete() {
                return Ok(event.waveform);
            }
        }
        Err(PipelineError::DecodeFailure(
            "extraction ended without a result".into(),
        ))
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

impl Drop for ExtractionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn write_sine(path: &Path, seconds: f32, sample_rate: u32, channels: u16, amplitude: f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (seconds * sample_rate as f32) as usize;
        for n in 0..frames {
            let v = (TAU * 440.0 * n as f32 / sample_rate as f32).sin() * amplitude;
            for _ in 0..channels {
                writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn final_event(events: Vec<Result<WaveformProgress>>) -> WaveformProgress {
        events.into_iter().last().unwrap().unwrap()
    }

    #[test]
    fn ten_seconds_keeps_trailing_partial_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_sine(&path, 10.0, 44_100, 1, 0.5);

        let events: Vec<_> =
            WaveformExtractor::new(&path, dir.path(), ExtractorConfig::default()).collect();
        let last = final_event(events);
        assert!(last.is_complete());
        // 441000 / 256 = 1722.66
        assert_eq!(last.waveform.length(), 1723);
        assert_eq!(last.waveform.sample_rate(), 44_100);
        assert_eq!(last.waveform.samples_per_pixel(), 256);
    }

    #[test]
    fn progress_is_monotonic_and_ends_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_sine(&path, 2.0, 22_050, 2, 0.5);

        let events: Vec<_> = WaveformExtractor::new(&path, dir.path(), ExtractorConfig::default())
            .map(Result::unwrap)
            .collect();
        assert!(events.len() > 1, "expected intermediate events");

        for pair in events.windows(2) {
            assert!(pair[0].progress < pair[1].progress);
            assert!(pair[0].waveform.length() <= pair[1].waveform.length());
        }
        let (last, partial) = events.split_last().unwrap();
        assert!(partial.iter().all(|e| !e.is_complete()));
        assert_eq!(last.progress, 1.0);
    }

    #[test]
    fn columns_hold_true_min_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_sine(&path, 1.0, 44_100, 1, 0.5);

        let events: Vec<_> =
            WaveformExtractor::new(&path, dir.path(), ExtractorConfig::default()).collect();
        let wf = final_event(events).waveform;
        for (min, max) in wf.columns() {
            assert!(min <= max);
            assert!(max <= 16_500 && min >= -16_500);
        }
        let peak = wf.columns().map(|(_, max)| max).max().unwrap();
        assert!(peak > 15_000, "{peak}");
    }

    #[test]
    fn eight_bit_sets_flag_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_sine(&path, 1.0, 8_000, 1, 1.0);

        let config = ExtractorConfig {
            bits: 8,
            ..ExtractorConfig::default()
        };
        let events: Vec<_> = WaveformExtractor::new(&path, dir.path(), config).collect();
        let wf = final_event(events).waveform;
        assert!(wf.is_8_bit());
        assert!(wf.data().iter().all(|&v| (-128..=127).contains(&v)));
    }

    #[test]
    fn missing_file_errors_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = WaveformExtractor::new(
            dir.path().join("gone.wav"),
            dir.path(),
            ExtractorConfig::default(),
        );
        assert!(matches!(
            extractor.next(),
            Some(Err(PipelineError::DecodeFailure(_)))
        ));
        assert!(extractor.next().is_none());
    }

    #[test]
    fn non_audio_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        std::fs::write(&path, vec![0x5a; 4096]).unwrap();
        let mut extractor = WaveformExtractor::new(&path, dir.path(), ExtractorConfig::default());
        assert!(matches!(extractor.next(), Some(Err(_))));
        assert!(extractor.next().is_none());
    }

    #[test]
    fn cancelled_extractor_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_sine(&path, 1.0, 8_000, 1, 0.5);

        let flag = Arc::new(AtomicBool::new(true));
        let mut extractor = WaveformExtractor::new(&path, dir.path(), ExtractorConfig::default())
            .with_cancel(flag);
        assert!(extractor.next().is_none());
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            spawn_extraction(dir.path().join("x.wav"), dir.path(), &ExtractorConfig::default()),
            Err(PipelineError::WorkerSpawnFailure(_))
        ));
    }

    #[tokio::test]
    async fn async_extraction_cleans_scratch_dir() {
        let source_dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let path = source_dir.path().join("take.wav");
        write_sine(&path, 1.0, 44_100, 1, 0.5);

        let handle = spawn_extraction(&path, scratch.path(), &ExtractorConfig::default()).unwrap();
        let wf = handle.finish().await.unwrap();
        // 44100 / 256 = 172.27
        assert_eq!(wf.length(), 173);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn async_failure_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let handle =
            spawn_extraction(dir.path().join("gone.wav"), dir.path(), &ExtractorConfig::default())
                .unwrap();
        assert!(matches!(
            handle.finish().await,
            Err(PipelineError::DecodeFailure(_))
        ));
    }
}
