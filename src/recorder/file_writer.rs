// src/recorder/file_writer.rs

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use ringbuf::traits::Consumer;

use crate::error::{PipelineError, Result};
use crate::recorder::meter::AmplitudeMeter;

fn wav_error(err: hound::Error) -> PipelineError {
    match err {
        hound::Error::IoError(e) => PipelineError::Io(e),
        other => PipelineError::Io(std::io::Error::other(other)),
    }
}

/// Drains captured f32 samples into a 16-bit WAV file and feeds the
/// amplitude meter on the way.
pub struct FileWriter {
    writer: WavWriter<BufWriter<File>>,
    channels: usize,
}

impl FileWriter {
    pub fn create(path: &Path, sample_rate: u32, channels: usize) -> Result<Self> {
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(wav_error)?;
        Ok(Self {
            writer,
            channels: channels.max(1),
        })
    }

    /// Runs until `stop` is set, then drains what is left and finalizes the
    /// header. `frames_written` counts whole frames.
    pub fn run<C>(
        mut self,
        mut consumer: C,
        meter: Arc<AmplitudeMeter>,
        stop: Arc<AtomicBool>,
        frames_written: Arc<AtomicU64>,
    ) -> Result<()>
    where
        C: Consumer<Item = f32>,
    {
        let mut tmp = vec![0.0f32; 4096];
        let mut samples: u64 = 0;

        loop {
            let stopping = stop.load(Ordering::Acquire);
            let popped = consumer.pop_slice(&mut tmp);
            if popped == 0 {
                if stopping {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
                continue;
            }

            let block = &tmp[..popped];
            for &s in block {
                let sample = if s.is_finite() {
                    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                } else {
                    0
                };
                self.writer.write_sample(sample).map_err(wav_error)?;
            }
            meter.process_block(block);

            samples += popped as u64;
            frames_written.store(samples / self.channels as u64, Ordering::Relaxed);
        }

        self.writer.finalize().map_err(wav_error)?;
        log::debug!("WAV finalized after {samples} samples");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::HeapRb;
    use ringbuf::traits::{Producer, Split};

    #[test]
    fn drains_everything_before_finalizing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let (mut prod, cons) = HeapRb::<f32>::new(16_384).split();
        let block: Vec<f32> = (0..8_000).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert_eq!(prod.push_slice(&block), block.len());

        let meter = Arc::new(AmplitudeMeter::new());
        let stop = Arc::new(AtomicBool::new(true));
        let frames = Arc::new(AtomicU64::new(0));

        let writer = FileWriter::create(&path, 16_000, 2).unwrap();
        writer.run(cons, meter.clone(), stop, frames.clone()).unwrap();

        assert_eq!(frames.load(Ordering::Relaxed), 4_000);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 4_000);

        let reading = meter.read().unwrap();
        assert!((reading.current - crate::recorder::meter::to_db(0.5)).abs() < 1e-3);
    }

    #[test]
    fn non_finite_samples_become_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let (mut prod, cons) = HeapRb::<f32>::new(16).split();
        prod.push_slice(&[f32::NAN, 2.0, -2.0]);

        let writer = FileWriter::create(&path, 8_000, 1).unwrap();
        writer
            .run(
                cons,
                Arc::new(AmplitudeMeter::new()),
                Arc::new(AtomicBool::new(true)),
                Arc::new(AtomicU64::new(0)),
            )
            .unwrap();

        let samples: Vec<i16> = hound::WavReader::open(&path)
            .unwrap()
            .samples::<i16>()
            .map(Result::unwrap)
            .collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX]);
    }
}
