// src/recorder/input.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::traits::Producer;

use crate::error::{PipelineError, Result};

/// Whether the default host exposes a capture device at all.
pub fn has_input_device() -> bool {
    cpal::default_host().default_input_device().is_some()
}

/// Live cpal capture stream. Interleaved f32 frames go into the producer
/// handed to [`AudioInput::open`]; while `paused` is set they are discarded.
pub struct AudioInput {
    _stream: Stream,
    pub channels: usize,
    pub sample_rate: u32,
}

impl AudioInput {
    pub fn open<P>(producer: P, paused: Arc<AtomicBool>) -> Result<Self>
    where
        P: Producer<Item = f32> + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(PipelineError::PermissionDenied)?;

        let supported = device.default_input_config().map_err(|e| {
            log::warn!("Input device refused its default config: {e}");
            PipelineError::PermissionDenied
        })?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32, _>(&device, &config, producer, paused)?,
            SampleFormat::I16 => build_stream::<i16, _>(&device, &config, producer, paused)?,
            SampleFormat::I32 => build_stream::<i32, _>(&device, &config, producer, paused)?,
            SampleFormat::U16 => build_stream::<u16, _>(&device, &config, producer, paused)?,
            other => {
                return Err(PipelineError::Device(format!(
                    "unsupported input sample format {other:?}"
                )));
            }
        };

        log::info!("Input device: {channels} ch @ {sample_rate} Hz ({sample_format:?})");
        Ok(Self {
            _stream: stream,
            channels,
            sample_rate,
        })
    }
}

fn build_stream<T, P>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: P,
    paused: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
    P: Producer<Item = f32> + Send + 'static,
{
    let mut converted: Vec<f32> = Vec::new();
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if paused.load(Ordering::Relaxed) {
                    return;
                }
                converted.clear();
                converted.extend(data.iter().map(|&s| f32::from_sample(s)));
                // A full buffer drops the tail of this block.
                producer.push_slice(&converted);
            },
            |err| log::error!("Input stream error: {err}"),
            None,
        )
        .map_err(PipelineError::device)?;

    stream.play().map_err(PipelineError::device)?;
    Ok(stream)
}
