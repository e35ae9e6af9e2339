// src/playback/player.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use cpal::Stream;
use cpal::traits::StreamTrait;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::audio::{open_output_stream, setup_output_device};
use crate::decoder::{DecodedAudio, decode_file, dsp};
use crate::error::{PipelineError, Result};
use crate::playback::{PlaybackBackend, PlaybackEvent, PlayerState};

const NO_SEEK: u64 = u64::MAX;
const POSITION_INTERVAL: Duration = Duration::from_millis(50);
const EVENT_CAPACITY: usize = 64;

/// State shared with the output callback. Positions are in source frames,
/// stored as f64 bits.
struct Transport {
    playing: AtomicBool,
    finished: AtomicBool,
    position: AtomicU64,
    seek_to: AtomicU64,
    source_rate: AtomicU32,
}

impl Transport {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            position: AtomicU64::new(0f64.to_bits()),
            seek_to: AtomicU64::new(NO_SEEK),
            source_rate: AtomicU32::new(0),
        }
    }

    fn position(&self) -> Duration {
        let rate = self.source_rate.load(Ordering::Relaxed);
        if rate == 0 {
            return Duration::ZERO;
        }
        let frames = f64::from_bits(self.position.load(Ordering::Relaxed));
        Duration::from_secs_f64(frames.max(0.0) / rate as f64)
    }
}

/// A decode running on the blocking pool; the stream opens once it lands.
struct PendingStart {
    source: PathBuf,
    decoded: oneshot::Receiver<Result<DecodedAudio>>,
    paused: bool,
}

/// Plays a whole decoded file through the default output device.
///
/// Rate conversion is nearest-frame stepping; good enough for reviewing a
/// take, not for mastering.
pub struct CpalPlayer {
    transport: Arc<Transport>,
    stream: Option<Stream>,
    pending: Option<PendingStart>,
    events: mpsc::Sender<PlaybackEvent>,
    ticker: Option<JoinHandle<()>>,
}

impl CpalPlayer {
    /// The receiver gets every [`PlaybackEvent`]. Position and completion
    /// events need a tokio runtime; without one only command-driven events
    /// are reported.
    pub fn new() -> (Self, mpsc::Receiver<PlaybackEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CAPACITY);
        let transport = Arc::new(Transport::new());

        let ticker = match Handle::try_current() {
            Ok(handle) => Some(handle.spawn(position_ticker(transport.clone(), events.clone()))),
            Err(e) => {
                log::warn!("No runtime for playback position events: {e}");
                None
            }
        };

        let player = Self {
            transport,
            stream: None,
            pending: None,
            events,
            ticker,
        };
        (player, rx)
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            log::trace!("Playback event dropped: {event:?}");
        }
    }

    fn start(&mut self, source: &Path, audio: DecodedAudio, paused: bool) -> Result<()> {
        let duration = Duration::from_secs_f64(audio.frames() as f64 / audio.sample_rate as f64);
        log::debug!(
            "Decoded {} ({} ch @ {} Hz, {:.2}s)",
            source.display(),
            audio.channels,
            audio.sample_rate,
            duration.as_secs_f64()
        );

        self.start_stream(audio, !paused)?;
        self.emit(PlaybackEvent::DurationChanged(duration));
        let state = if paused { PlayerState::Paused } else { PlayerState::Playing };
        self.emit(PlaybackEvent::StateChanged(state));
        Ok(())
    }

    fn start_stream(&mut self, audio: DecodedAudio, playing: bool) -> Result<()> {
        let output = setup_output_device()?;
        let out_channels = output.output_channels.max(1);
        let step = audio.sample_rate as f64 / output.output_sample_rate as f64;
        let transport = self.transport.clone();

        let frames = audio.frames();
        let channels = audio.channels.max(1);
        let samples = if channels == out_channels {
            audio.samples
        } else {
            dsp::updown_mix_interleaved(&audio.samples, channels, out_channels)
        };

        let mut cursor = 0.0f64;
        let stream = open_output_stream(&output, move |out: &mut [f32]| {
            let seek = transport.seek_to.swap(NO_SEEK, Ordering::AcqRel);
            if seek != NO_SEEK {
                cursor = f64::from_bits(seek);
            }
            let playing = transport.playing.load(Ordering::Relaxed);

            for frame in out.chunks_mut(out_channels) {
                let idx = cursor as usize;
                if !playing || idx >= frames {
                    frame.fill(0.0);
                    continue;
                }
                let start = idx * out_channels;
                frame.copy_from_slice(&samples[start..start + frame.len()]);
                cursor += step;
            }

            if playing && cursor as usize >= frames {
                transport.playing.store(false, Ordering::Relaxed);
                transport.finished.store(true, Ordering::Release);
            }
            transport.position.store(cursor.to_bits(), Ordering::Relaxed);
        })?;

        self.transport.source_rate.store(audio.sample_rate, Ordering::Relaxed);
        self.transport.position.store(0f64.to_bits(), Ordering::Relaxed);
        self.transport.seek_to.store(NO_SEEK, Ordering::Relaxed);
        self.transport.finished.store(false, Ordering::Relaxed);
        self.transport.playing.store(playing, Ordering::Relaxed);
        stream.play().map_err(PipelineError::device)?;
        self.stream = Some(stream);
        Ok(())
    }
}

impl PlaybackBackend for CpalPlayer {
    /// Inside a runtime the file is decoded on the blocking pool and the
    /// stream opens from [`poll`](PlaybackBackend::poll); outside one it is
    /// decoded here.
    fn play(&mut self, source: &Path) -> Result<()> {
        self.stream = None;
        self.pending = None;
        let Ok(handle) = Handle::try_current() else {
            let audio = decode_file(source)?;
            return self.start(source, audio, false);
        };

        let (tx, decoded) = oneshot::channel();
        let path = source.to_path_buf();
        handle.spawn_blocking(move || {
            let _ = tx.send(decode_file(&path));
        });
        self.pending = Some(PendingStart {
            source: source.to_path_buf(),
            decoded,
            paused: false,
        });
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        let decoded = match pending.decoded.try_recv() {
            Ok(decoded) => decoded,
            Err(oneshot::error::TryRecvError::Empty) => {
                self.pending = Some(pending);
                return Ok(());
            }
            Err(oneshot::error::TryRecvError::Closed) => Err(PipelineError::WorkerSpawnFailure(
                "playback decode task vanished".into(),
            )),
        };

        let started = decoded.and_then(|audio| self.start(&pending.source, audio, pending.paused));
        if started.is_err() {
            self.emit(PlaybackEvent::StateChanged(PlayerState::Stopped));
        }
        started
    }

    fn resume(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.as_mut() {
            pending.paused = false;
            self.emit(PlaybackEvent::StateChanged(PlayerState::Playing));
        } else if self.stream.is_some() {
            self.transport.playing.store(true, Ordering::Relaxed);
            self.emit(PlaybackEvent::StateChanged(PlayerState::Playing));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.as_mut() {
            pending.paused = true;
            self.emit(PlaybackEvent::StateChanged(PlayerState::Paused));
        } else if self.stream.is_some() {
            self.transport.playing.store(false, Ordering::Relaxed);
            self.emit(PlaybackEvent::StateChanged(PlayerState::Paused));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.pending = None;
        self.transport.playing.store(false, Ordering::Relaxed);
        self.transport.finished.store(false, Ordering::Relaxed);
        self.transport.position.store(0f64.to_bits(), Ordering::Relaxed);
        if self.stream.take().is_some() {
            self.emit(PlaybackEvent::StateChanged(PlayerState::Stopped));
        }
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let rate = self.transport.source_rate.load(Ordering::Relaxed);
        let frames = position.as_secs_f64() * rate as f64;
        self.transport.position.store(frames.to_bits(), Ordering::Relaxed);
        self.transport.seek_to.store(frames.to_bits(), Ordering::Release);
        self.emit(PlaybackEvent::PositionChanged(position));
        Ok(())
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

async fn position_ticker(transport: Arc<Transport>, events: mpsc::Sender<PlaybackEvent>) {
    let mut ticker = tokio::time::interval(POSITION_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = None;
    loop {
        ticker.tick().await;
        if events.is_closed() {
            break;
        }
        if transport.finished.swap(false, Ordering::AcqRel) {
            if events.send(PlaybackEvent::Completed).await.is_err() {
                break;
            }
            last = None;
            continue;
        }
        if !transport.playing.load(Ordering::Relaxed) {
            continue;
        }
        let position = transport.position();
        if last != Some(position) {
            last = Some(position);
            // Positions are superseded by the next tick; never wait for room.
            let _ = events.try_send(PlaybackEvent::PositionChanged(position));
        }
    }
}
