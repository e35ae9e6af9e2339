// src/recorder/mod.rs

pub mod file_writer;
pub mod input;
pub mod meter;
pub mod ring_window;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use ringbuf::{HeapRb, traits::Split};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{PipelineError, Result};
use crate::recorder::{
    file_writer::FileWriter,
    input::AudioInput,
    meter::{AmplitudeMeter, AmplitudeSample},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Stopped,
    Recording,
    Paused,
}

/// The microphone as the rest of the pipeline sees it.
///
/// Event streams are bounded channels, one per subscription, FIFO within a
/// stream. A subscriber that falls behind misses events rather than
/// stalling capture.
pub trait MicrophoneCapture {
    fn has_permission(&self) -> bool;
    fn start(&mut self, path: &Path) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    /// Finishes the take and returns its file, if one was written.
    fn stop(&mut self) -> Option<PathBuf>;
    fn state(&self) -> RecordState;
    fn subscribe_state(&mut self) -> mpsc::Receiver<RecordState>;
    /// Needs a tokio runtime for the ticker task.
    fn subscribe_amplitude(&mut self, interval: Duration) -> Result<mpsc::Receiver<AmplitudeSample>>;
}

const CAPTURE_BUFFER: usize = 192_000;
const EVENT_CAPACITY: usize = 16;

struct Take {
    input: AudioInput,
    writer: thread::JoinHandle<Result<()>>,
    stop: Arc<AtomicBool>,
    path: PathBuf,
}

/// cpal capture into a 16-bit WAV file.
pub struct CpalRecorder {
    take: Option<Take>,
    state: RecordState,
    meter: Arc<AmplitudeMeter>,
    paused: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    state_subscribers: Vec<mpsc::Sender<RecordState>>,
}

impl Default for CpalRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalRecorder {
    pub fn new() -> Self {
        Self {
            take: None,
            state: RecordState::Stopped,
            meter: Arc::new(AmplitudeMeter::new()),
            paused: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: 0,
            state_subscribers: Vec::new(),
        }
    }

    /// Length of the current (or last) take.
    pub fn record_time(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.frames.load(Ordering::Relaxed);
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    fn set_state(&mut self, state: RecordState) {
        if self.state == state {
            return;
        }
        self.state = state;
        log::debug!("Recorder state: {state:?}");
        self.state_subscribers.retain(|tx| match tx.try_send(state) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("State subscriber lagging, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

impl MicrophoneCapture for CpalRecorder {
    fn has_permission(&self) -> bool {
        input::has_input_device()
    }

    fn start(&mut self, path: &Path) -> Result<()> {
        if self.take.is_some() {
            log::warn!("Already recording, start ignored");
            return Ok(());
        }

        let (producer, consumer) = HeapRb::<f32>::new(CAPTURE_BUFFER).split();
        self.paused.store(false, Ordering::Relaxed);
        let input = AudioInput::open(producer, self.paused.clone())?;

        let writer = FileWriter::create(path, input.sample_rate, input.channels)?;
        let stop = Arc::new(AtomicBool::new(false));
        self.meter.reset();
        self.frames.store(0, Ordering::Relaxed);
        self.sample_rate = input.sample_rate;

        let writer = {
            let (meter, stop, frames) = (self.meter.clone(), stop.clone(), self.frames.clone());
            thread::Builder::new()
                .name("recorder-writer".into())
                .spawn(move || writer.run(consumer, meter, stop, frames))?
        };

        log::info!("Recording to {}", path.display());
        self.take = Some(Take {
            input,
            writer,
            stop,
            path: path.to_path_buf(),
        });
        self.set_state(RecordState::Recording);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.state == RecordState::Recording {
            self.paused.store(true, Ordering::Relaxed);
            self.set_state(RecordState::Paused);
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if self.state == RecordState::Paused {
            self.paused.store(false, Ordering::Relaxed);
            self.set_state(RecordState::Recording);
        }
        Ok(())
    }

    fn stop(&mut self) -> Option<PathBuf> {
        let take = self.take.take()?;
        // Stop capturing first so the writer can drain to empty.
        drop(take.input);
        take.stop.store(true, Ordering::Release);

        let written = match take.writer.join() {
            Ok(Ok(())) => Some(take.path),
            Ok(Err(e)) => {
                log::error!("Recording to {} failed: {e}", take.path.display());
                None
            }
            Err(_) => {
                log::error!("Recorder writer thread panicked");
                None
            }
        };

        self.meter.reset();
        self.paused.store(false, Ordering::Relaxed);
        self.set_state(RecordState::Stopped);
        if let Some(path) = &written {
            log::info!("Recording saved: {} ({:.1}s)", path.display(), self.record_time().as_secs_f64());
        }
        written
    }

    fn state(&self) -> RecordState {
        self.state
    }

    fn subscribe_state(&mut self) -> mpsc::Receiver<RecordState> {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        self.state_subscribers.push(tx);
        rx
    }

    fn subscribe_amplitude(&mut self, interval: Duration) -> Result<mpsc::Receiver<AmplitudeSample>> {
        let handle =
            Handle::try_current().map_err(|e| PipelineError::WorkerSpawnFailure(e.to_string()))?;
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        handle.spawn(amplitude_ticker(
            self.meter.clone(),
            self.paused.clone(),
            interval,
            tx,
        ));
        Ok(rx)
    }
}

impl Drop for CpalRecorder {
    fn drop(&mut self) {
        if self.take.is_some() {
            self.stop();
        }
    }
}

/// Reads the meter once per `interval`. Nothing is sent before the first
/// captured block or while paused.
async fn amplitude_ticker(
    meter: Arc<AmplitudeMeter>,
    paused: Arc<AtomicBool>,
    interval: Duration,
    tx: mpsc::Sender<AmplitudeSample>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        if paused.load(Ordering::Relaxed) {
            continue;
        }
        let Some(sample) = meter.read() else {
            continue;
        };
        if let Err(TrySendError::Closed(_)) = tx.try_send(sample) {
            break;
        }
    }
    log::debug!("Amplitude ticker stopped");
}
